//! Client playback: device stream and the callback fill policy
//!
//! The audio backend pulls fixed 256-frame buffers; [`SinkScheduler`]
//! converts the jitter ring plus the synchronized clock into each fill.
//! [`Player`] owns the device stream on a dedicated thread (cpal streams
//! are not `Send`) and the ingestion path that feeds the ring from
//! decoded network frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use crate::audio::buffer::SampleRing;
use crate::audio::sample::Sample;
use crate::config::{AudioConfig, PlaybackConfig};
use crate::constants::SAMPLE_STALE_CUTOFF;
use crate::error::AudioError;
use crate::protocol::{sample_duration, AudioFrame};
use crate::sync::SyncClock;

/// Outcome of one callback fill
#[derive(Debug, Clone, Copy, Default)]
pub struct FillStats {
    /// Stereo frames the device asked for
    pub requested: usize,
    /// Stale samples discarded from the head of the ring
    pub dropped: usize,
    /// Leading output slots padded with silence
    pub filled: usize,
    /// Samples actually played from the ring
    pub drained: usize,
    /// The ring ran dry mid-fill
    pub underflow: bool,
    /// False once the ring is closed; the stream should wind down
    pub active: bool,
}

/// Converts ring plus clock into fixed-size callback fills.
///
/// Policy per callback: drop samples already outside the delay threshold,
/// pad with silence while the stream is ahead of effective-now, then drain
/// one sample per remaining slot.
pub struct SinkScheduler {
    ring: Arc<SampleRing>,
    clock: Arc<SyncClock>,
    sample_rate: u32,
    delay_threshold: Duration,
}

impl SinkScheduler {
    pub fn new(
        ring: Arc<SampleRing>,
        clock: Arc<SyncClock>,
        sample_rate: u32,
        delay_threshold: Duration,
    ) -> Self {
        Self {
            ring,
            clock,
            sample_rate,
            delay_threshold,
        }
    }

    /// Fill an interleaved stereo buffer. Always accounts for every slot
    /// from the device's point of view; on underflow the remaining slots
    /// keep their prior content.
    pub fn fill(&self, out: &mut [f32]) -> FillStats {
        let requested = out.len() / 2;
        let mut stats = FillStats {
            requested,
            active: true,
            ..FillStats::default()
        };

        // Blocks until the stream has data; a closed ring means teardown.
        let mut head = match self.ring.peek() {
            Some(head) => head,
            None => {
                out.fill(0.0);
                stats.active = false;
                return stats;
            }
        };

        // Drop everything already too late to play.
        loop {
            let lateness = self.clock.now().duration_since(head.play_at);
            match lateness {
                Ok(late) if late >= self.delay_threshold => {
                    let _ = self.ring.try_dequeue();
                    stats.dropped += 1;
                    head = match self.ring.peek() {
                        Some(next) => next,
                        None => {
                            out.fill(0.0);
                            stats.active = false;
                            return stats;
                        }
                    };
                }
                _ => break,
            }
        }

        // Ahead of the stream: pad the gap with silence.
        if let Ok(early) = head.play_at.duration_since(self.clock.now()) {
            if early > self.delay_threshold {
                let gap = (early.as_secs_f64() * self.sample_rate as f64).ceil() as usize;
                stats.filled = gap.min(requested);
                out[..stats.filled * 2].fill(0.0);
            }
        }

        for slot in out[stats.filled * 2..].chunks_exact_mut(2) {
            match self.ring.try_dequeue() {
                Some(sample) => {
                    slot[0] = sample.channels[0] as f32;
                    slot[1] = sample.channels[1] as f32;
                    stats.drained += 1;
                }
                None => {
                    stats.underflow = true;
                    break;
                }
            }
        }

        if stats.dropped > 0 {
            tracing::warn!("dropped {} stale samples", stats.dropped);
        }
        if stats.filled > 0 {
            tracing::warn!("filled {} samples with silence", stats.filled);
        }
        if stats.underflow {
            tracing::warn!(
                "ring underflow, played {} of {} samples",
                stats.drained,
                requested - stats.filled
            );
        }

        stats
    }
}

/// Client-side audio player: jitter ring, device stream, ingestion.
pub struct Player {
    ring: Arc<SampleRing>,
    clock: Arc<SyncClock>,
    sample_rate: u32,
    device_buffer_size: u32,
    delay_threshold: Duration,
    running: Arc<AtomicBool>,
    device_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    pub fn new(clock: Arc<SyncClock>, audio: &AudioConfig, playback: &PlaybackConfig) -> Self {
        let ring_capacity =
            (audio.sample_rate as u128 * playback.ring_duration.as_millis() / 1_000) as usize;
        let ring = Arc::new(SampleRing::new(ring_capacity.max(1)));

        tracing::info!("jitter ring holds {} samples", ring.capacity());

        Self {
            ring,
            clock,
            sample_rate: audio.sample_rate,
            device_buffer_size: playback.device_buffer_size,
            delay_threshold: playback.delay_threshold,
            running: Arc::new(AtomicBool::new(false)),
            device_thread: Mutex::new(None),
        }
    }

    pub fn ring(&self) -> &Arc<SampleRing> {
        &self.ring
    }

    /// Playback duration of `n` samples at the stream rate
    pub fn sample_duration(&self, n: usize) -> Duration {
        sample_duration(n, self.sample_rate)
    }

    /// How far past its final sample's playback instant a frame already
    /// is, per the latency-adjusted clock. `None` while still playable.
    pub fn frame_lag(&self, frame: &AudioFrame) -> Option<Duration> {
        let playback_end = frame.time.to_system() + self.sample_duration(frame.len());
        self.clock.now().duration_since(playback_end).ok()
    }

    /// Feed one network frame into the ring.
    ///
    /// Stops at the first sample more than 100 ms stale and drops the
    /// rest of the frame. Blocks on a full ring, which backpressures the
    /// ingestion task against a too-eager producer. Returns how many
    /// samples went in.
    pub fn ingest(&self, frame: &AudioFrame) -> usize {
        let mut enqueued = 0;

        for (i, (&left, &right)) in frame.left.iter().zip(frame.right.iter()).enumerate() {
            let play_at = frame.sample_time(i, self.sample_rate);

            let stale = SystemTime::now()
                .duration_since(play_at)
                .map_or(false, |late| late > SAMPLE_STALE_CUTOFF);
            if stale {
                break;
            }

            if !self.ring.enqueue(Sample::new([left, right], play_at)) {
                break;
            }
            enqueued += 1;
        }

        enqueued
    }

    /// Start the device stream. Best-effort: a missing or failing device
    /// is logged and the player keeps accepting samples.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = SinkScheduler::new(
            self.ring.clone(),
            self.clock.clone(),
            self.sample_rate,
            self.delay_threshold,
        );
        let running = self.running.clone();
        let config = StreamConfig {
            channels: 2,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: BufferSize::Fixed(self.device_buffer_size),
        };

        let handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                if let Err(e) = run_output_stream(config, scheduler, &running) {
                    tracing::error!("audio output unavailable: {e}");
                }
            });

        match handle {
            Ok(handle) => {
                let mut slot = self
                    .device_thread
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                *slot = Some(handle);
                tracing::info!("playback started");
            }
            Err(e) => {
                tracing::error!("failed to spawn audio thread: {e}");
            }
        }
    }

    /// Stop the device stream and flush the ring; the player is ready for
    /// the next connection afterwards.
    pub fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
        // close wakes a callback blocked in peek so the stream can wind down
        self.ring.close();

        let handle = {
            let mut slot = self
                .device_thread
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        self.ring.clear();
        tracing::info!("playback released");
    }

    /// Final teardown: like release, but the ring stays closed so any
    /// in-flight ingestion task drops out immediately.
    pub fn shutdown(&self) {
        self.release();
        self.ring.close();
    }
}

/// Body of the device thread: owns the stream for its whole life.
fn run_output_stream(
    config: StreamConfig,
    scheduler: SinkScheduler,
    running: &AtomicBool,
) -> Result<(), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                scheduler.fill(data);
            },
            |err| tracing::warn!("output stream error: {err}"),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(10));
    }

    // stream drops here, stopping playback
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioConfig, PlaybackConfig};
    use crate::constants::INITIAL_LATENCY;
    use crate::protocol::WireTime;

    const RATE: u32 = 44_100;
    // wider than the production threshold so scheduler decisions are not
    // sensitive to how fast the test machine reaches fill()
    const DELTA: Duration = Duration::from_millis(50);

    fn zero_latency_clock() -> Arc<SyncClock> {
        Arc::new(SyncClock::new(Duration::ZERO))
    }

    fn scheduler(ring: &Arc<SampleRing>, clock: &Arc<SyncClock>) -> SinkScheduler {
        SinkScheduler::new(ring.clone(), clock.clone(), RATE, DELTA)
    }

    fn push_at(ring: &SampleRing, value: f64, play_at: SystemTime) {
        assert!(ring.enqueue(Sample::new([value, value], play_at)));
    }

    #[test]
    fn stale_head_is_dropped_before_playing() {
        let ring = Arc::new(SampleRing::new(64));
        let clock = zero_latency_clock();
        let now = SystemTime::now();

        for i in 0..10 {
            push_at(&ring, -1.0, now - Duration::from_millis(200 - i));
        }
        for _ in 0..8 {
            push_at(&ring, 0.5, now + Duration::from_millis(20));
        }

        let mut out = [9.0f32; 8];
        let stats = scheduler(&ring, &clock).fill(&mut out);

        assert_eq!(stats.dropped, 10);
        assert_eq!(stats.filled, 0);
        assert_eq!(stats.drained, 4);
        assert!(!stats.underflow);
        assert!(out.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn early_stream_is_padded_with_silence() {
        let ring = Arc::new(SampleRing::new(64));
        let clock = zero_latency_clock();

        // a whole callback's worth of audio 200 ms in the future
        let ahead = SystemTime::now() + Duration::from_millis(200);
        for _ in 0..8 {
            push_at(&ring, 0.5, ahead);
        }

        let mut out = [9.0f32; 16];
        let stats = scheduler(&ring, &clock).fill(&mut out);

        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.filled, 8, "gap exceeds the callback, all silence");
        assert_eq!(stats.drained, 0);
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(ring.len(), 8, "future samples stay queued");
    }

    #[test]
    fn underflow_stops_short_and_keeps_prior_content() {
        let ring = Arc::new(SampleRing::new(64));
        let clock = zero_latency_clock();
        let now = SystemTime::now();

        for _ in 0..3 {
            push_at(&ring, 0.25, now + Duration::from_millis(20));
        }

        let mut out = [7.0f32; 16];
        let stats = scheduler(&ring, &clock).fill(&mut out);

        assert_eq!(stats.drained, 3);
        assert!(stats.underflow);
        assert!(out[..6].iter().all(|&v| v == 0.25));
        assert!(out[6..].iter().all(|&v| v == 7.0), "short fill keeps prior content");
    }

    #[test]
    fn closed_ring_goes_silent_and_inactive() {
        let ring = Arc::new(SampleRing::new(8));
        let clock = zero_latency_clock();
        ring.close();

        let mut out = [3.0f32; 8];
        let stats = scheduler(&ring, &clock).fill(&mut out);

        assert!(!stats.active);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    fn player() -> Player {
        Player::new(
            Arc::new(SyncClock::new(INITIAL_LATENCY)),
            &AudioConfig::default(),
            &PlaybackConfig::default(),
        )
    }

    fn frame_at(t0: SystemTime, n: usize) -> AudioFrame {
        AudioFrame::new(vec![0.1; n], vec![0.2; n], WireTime::from_system(t0))
    }

    #[test]
    fn fresh_frame_is_ingested_whole() {
        let p = player();
        let n = p.ingest(&frame_at(SystemTime::now(), 128));

        assert_eq!(n, 128);
        assert_eq!(p.ring().len(), 128);
    }

    #[test]
    fn stale_frame_head_stops_ingestion() {
        let p = player();

        // first sample is already 150 ms late, so nothing goes in
        let n = p.ingest(&frame_at(SystemTime::now() - Duration::from_millis(150), 128));

        assert_eq!(n, 0);
        assert!(p.ring().is_empty());
    }

    #[test]
    fn frame_lag_flags_long_expired_frames() {
        let p = player();

        let expired = frame_at(SystemTime::now() - Duration::from_secs(3), 512);
        let lag = p.frame_lag(&expired).unwrap();
        assert!(lag > Duration::from_secs(2));

        let fresh = frame_at(SystemTime::now() + Duration::from_millis(50), 512);
        assert!(p.frame_lag(&fresh).is_none());
    }
}
