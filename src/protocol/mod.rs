//! Wire protocol messages
//!
//! Three message kinds cross the socket: audio frames (server to client),
//! time probes (client to server) and latency replies (server to client).
//! Payloads are bincode-serialized; the framing layer prepends the
//! 16-byte `(type, length)` header.

pub mod framing;

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Type tag for audio frames
pub const AUDIO_TAG: u64 = 0x10;
/// Type tag for time probes
pub const TIME_PROBE_TAG: u64 = 0x20;
/// Type tag for latency replies
pub const LATENCY_REPLY_TAG: u64 = 0x30;

/// Wall-clock instant as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTime {
    /// Seconds since the Unix epoch
    pub seconds: i64,
    /// Nanosecond remainder
    pub nanos: i32,
}

impl WireTime {
    /// Capture the current wall clock
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    pub fn from_system(t: SystemTime) -> Self {
        let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            seconds: since_epoch.as_secs() as i64,
            nanos: since_epoch.subsec_nanos() as i32,
        }
    }

    pub fn to_system(self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.seconds.max(0) as u64, self.nanos.max(0) as u32)
    }
}

impl From<SystemTime> for WireTime {
    fn from(t: SystemTime) -> Self {
        Self::from_system(t)
    }
}

/// A batch of consecutive stereo samples with one base timestamp.
///
/// Sample `i` targets `time + i / sample_rate` at the listener. The two
/// channel arrays always have equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    /// Target playback instant of the first sample
    pub time: WireTime,
}

impl AudioFrame {
    pub fn new(left: Vec<f64>, right: Vec<f64>, time: WireTime) -> Self {
        debug_assert_eq!(left.len(), right.len());
        Self { left, right, time }
    }

    /// Number of stereo samples in the batch
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Playback duration of the whole batch at `sample_rate`
    pub fn duration(&self, sample_rate: u32) -> Duration {
        sample_duration(self.len(), sample_rate)
    }

    /// Target playback instant of sample `i`
    pub fn sample_time(&self, i: usize, sample_rate: u32) -> SystemTime {
        self.time.to_system() + sample_duration(i, sample_rate)
    }
}

/// Client-originated probe carrying its send instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeProbe {
    pub time: WireTime,
}

/// Server reply: observed probe traversal plus the reply's send instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyReply {
    /// Server-observed duration between the client's declared send time
    /// and the server's receive time, in nanoseconds
    pub latency_ns: i64,
    pub time: WireTime,
}

/// Any message that can cross the socket
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Audio(AudioFrame),
    TimeProbe(TimeProbe),
    LatencyReply(LatencyReply),
}

impl Message {
    /// Wire type tag for this variant
    pub fn tag(&self) -> u64 {
        match self {
            Message::Audio(_) => AUDIO_TAG,
            Message::TimeProbe(_) => TIME_PROBE_TAG,
            Message::LatencyReply(_) => LATENCY_REPLY_TAG,
        }
    }
}

/// Duration of `n` samples at `sample_rate`
pub fn sample_duration(n: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos((n as u64 * 1_000_000_000) / sample_rate as u64)
}
