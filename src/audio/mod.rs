//! Audio subsystem module

pub mod buffer;
pub mod playback;
pub mod resampler;
pub mod sample;
pub mod source;

pub use buffer::SampleRing;
pub use playback::{Player, SinkScheduler};
pub use sample::Sample;
pub use source::FileSource;
