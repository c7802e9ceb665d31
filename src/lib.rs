//! # LAN Audio Broadcast
//!
//! Real-time one-to-many PCM audio broadcast over TCP with wall-clock
//! synchronized playback.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── SERVER ────────────────────────────┐
//! │                                                                │
//! │  ./test/audio.mp3                                              │
//! │        │                                                       │
//! │        ▼                                                       │
//! │  ┌───────────┐    ┌────────────┐    ┌──────────────────────┐   │
//! │  │ FileSource│───▶│   Pacer    │───▶│  BroadcastServer     │   │
//! │  │(symphonia │    │ (512-sample│    │  session set, one    │   │
//! │  │ + rubato) │    │  frames at │    │  write task per      │   │
//! │  └───────────┘    │ audio rate)│    │  connected listener  │   │
//! │                   └────────────┘    └──────────┬───────────┘   │
//! └─────────────────────────────────────────────────┼──────────────┘
//!                    framed TCP, port 3000          │
//!              audio ──▶        ◀── time probes     │
//!              latency replies ──▶                  │
//! ┌─────────────────────────────────────────────────┼──────────────┐
//! │                                                 ▼              │
//! │  ┌──────────────┐   ┌────────────┐   ┌───────────────────┐     │
//! │  │ StreamClient │──▶│ SampleRing │──▶│ SinkScheduler     │     │
//! │  │ (reconnect   │   │ (blocking, │   │ drop-stale / fill │     │
//! │  │  run-loop,   │   │  ~500 ms)  │   │ silence, feeds the│     │
//! │  │  ingestion)  │   └────────────┘   │ 256-frame cpal    │     │
//! │  └──────┬───────┘                    │ pull callback     │     │
//! │         │          ┌───────────┐     └─────────▲─────────┘     │
//! │         └─────────▶│ SyncClock │───────────────┘               │
//! │   latency replies  │ (smoothed │  effective now                │
//! │                    │  one-way  │                               │
//! │                    │  latency) │            CLIENT             │
//! │                    └───────────┘                               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The server decodes the source file once per play-through and emits
//! timestamped stereo frames in real time. Each client smooths a one-way
//! latency estimate from periodic probes and plays every sample at its
//! server-assigned instant, shifted by that estimate.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod sync;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Output sample rate for the broadcast stream
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Samples per broadcast frame emitted by the pacer
    pub const SOURCE_FRAME_SIZE: usize = 512;

    /// Frames requested per device pull callback at the client
    pub const DEVICE_BUFFER_SIZE: u32 = 256;

    /// TCP port the server listens on
    pub const DEFAULT_PORT: u16 = 3000;

    /// Audio the jitter ring can hold before backpressure kicks in
    pub const RING_DURATION: Duration = Duration::from_millis(500);

    /// Tolerance window around effective-now for a sample to be played
    pub const DELAY_THRESHOLD: Duration = Duration::from_millis(10);

    /// Interval between client time probes (and the lifecycle tick)
    pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);

    /// Per-sample staleness cutoff during ingestion
    pub const SAMPLE_STALE_CUTOFF: Duration = Duration::from_millis(100);

    /// Whole frames older than this are discarded before ingestion
    pub const FRAME_STALE_CUTOFF: Duration = Duration::from_secs(1);

    /// Smoothed one-way latency before the first reply arrives
    pub const INITIAL_LATENCY: Duration = Duration::from_millis(5);

    /// Latency above this is worth a warning
    pub const LATENCY_WARN_THRESHOLD: Duration = Duration::from_secs(1);

    /// Delay between play-throughs of the source file
    pub const SOURCE_RESTART_DELAY: Duration = Duration::from_secs(1);

    /// Delay between client reconnect attempts
    pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

    /// Reconnect attempts before the client gives up
    pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 30;

    /// Lead applied to frame timestamps so samples arrive future-dated.
    /// Below scheduler precision; kept as documentation of intent.
    pub const PACER_EPSILON: Duration = Duration::from_nanos(100);
}
