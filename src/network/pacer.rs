//! Paced source loop
//!
//! Decodes the source file and emits timestamped frames at the audio
//! rate, so listeners receive samples just ahead of their playback
//! instants. Runs on its own thread; the transport is reached through a
//! [`FrameSink`] capability handed in at construction, never a back
//! reference.

use std::time::{Instant, SystemTime};

use crossbeam_channel::{Receiver, TryRecvError};

use crate::audio::FileSource;
use crate::config::AudioConfig;
use crate::constants::{PACER_EPSILON, SOURCE_RESTART_DELAY};
use crate::error::AudioError;
use crate::protocol::{sample_duration, AudioFrame};

/// Where the pacer hands finished frames
pub trait FrameSink: Send + Sync {
    /// Deliver one frame. Best-effort; delivery problems are the sink's
    /// to log.
    fn send_frame(&self, frame: AudioFrame);
}

/// Decode-and-emit loop for one source file, restarted forever
pub struct Pacer<S: FrameSink> {
    sink: S,
    audio: AudioConfig,
    source_path: String,
    stop: Receiver<()>,
}

impl<S: FrameSink> Pacer<S> {
    pub fn new(sink: S, audio: AudioConfig, source_path: String, stop: Receiver<()>) -> Self {
        Self {
            sink,
            audio,
            source_path,
            stop,
        }
    }

    /// Play the source in a loop until stopped. Open and decode failures
    /// are logged and retried after a pause.
    pub fn run(&mut self) {
        loop {
            tracing::info!("start to play file {}", self.source_path);

            match self.play_through() {
                Ok(Stopped::Yes) => break,
                Ok(Stopped::No) => tracing::info!("file play done"),
                Err(e) => tracing::error!("play file error: {e}"),
            }

            match self.stop.recv_timeout(SOURCE_RESTART_DELAY) {
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        }

        tracing::info!("pacer stopped");
    }

    /// One full pass over the source file.
    fn play_through(&self) -> Result<Stopped, AudioError> {
        let mut source = FileSource::open(
            &self.source_path,
            self.audio.sample_rate,
            self.audio.resample_quality,
        )?;

        if source.source_rate() != self.audio.sample_rate {
            tracing::info!(
                "resampling source from {} Hz to {} Hz",
                source.source_rate(),
                self.audio.sample_rate
            );
        }

        loop {
            // prefer the stop signal over starting another iteration
            match self.stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => return Ok(Stopped::Yes),
            }

            let iteration_start = Instant::now();

            let (left, right) = match source.read_chunk(self.audio.frame_size)? {
                Some(chunk) => chunk,
                None => return Ok(Stopped::No),
            };
            let samples = left.len();

            // future-date the frame so samples arrive ahead of their instant
            let t0 = SystemTime::now() + PACER_EPSILON;
            self.sink
                .send_frame(AudioFrame::new(left, right, t0.into()));

            let playback_interval = sample_duration(samples, self.audio.sample_rate);
            let remaining = playback_interval
                .checked_sub(iteration_start.elapsed())
                .and_then(|d| d.checked_sub(PACER_EPSILON));
            if let Some(sleep_for) = remaining {
                std::thread::sleep(sleep_for);
            }
        }
    }
}

#[derive(Debug)]
enum Stopped {
    Yes,
    No,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    impl FrameSink for CountingSink {
        fn send_frame(&self, _frame: AudioFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn missing_source_surfaces_an_open_error() {
        let (_tx, rx) = bounded(1);
        let pacer = Pacer::new(
            CountingSink(Arc::new(AtomicUsize::new(0))),
            AudioConfig::default(),
            "./does/not/exist.mp3".to_string(),
            rx,
        );

        match pacer.play_through() {
            Err(AudioError::SourceOpen { .. }) => {}
            other => panic!("expected a source open error, got {other:?}"),
        }
    }

    #[test]
    fn run_exits_when_the_stop_sender_drops() {
        let (tx, rx) = bounded(1);
        let sent = Arc::new(AtomicUsize::new(0));
        let mut pacer = Pacer::new(
            CountingSink(sent.clone()),
            AudioConfig::default(),
            "./does/not/exist.mp3".to_string(),
            rx,
        );

        drop(tx);
        // the open error is logged and the dropped channel ends the loop
        pacer.run();
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }
}
