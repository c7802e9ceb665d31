//! Runtime configuration
//!
//! Both binaries currently run from the defaults; the structs stay
//! serializable so a config file can be layered in later without touching
//! the pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::*;

/// Stream format shared by both endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Samples per frame emitted by the pacer
    pub frame_size: usize,
    /// Resampler quality applied when the source rate differs
    pub resample_quality: ResampleQuality,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: SOURCE_FRAME_SIZE,
            resample_quality: ResampleQuality::Balanced,
        }
    }
}

/// Resampler quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleQuality {
    /// Short sinc filter, linear interpolation
    Fast,
    /// Medium filter, cubic interpolation
    Balanced,
    /// Long filter, cubic interpolation
    Quality,
}

/// Client-side playback tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Frames requested per device pull callback
    pub device_buffer_size: u32,
    /// Tolerance window around effective-now for a sample to be played
    pub delay_threshold: Duration,
    /// How much audio the jitter ring holds
    pub ring_duration: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device_buffer_size: DEVICE_BUFFER_SIZE,
            delay_threshold: DELAY_THRESHOLD,
            ring_duration: RING_DURATION,
        }
    }
}

/// Transport and lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP port the server listens on and the client dials
    pub port: u16,
    /// Interval between time probes (also the lifecycle tick)
    pub probe_interval: Duration,
    /// Delay between reconnect attempts
    pub reconnect_interval: Duration,
    /// Reconnect attempts before the client gives up
    pub reconnect_max_attempts: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            probe_interval: PROBE_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub network: NetworkConfig,
}
