//! Decoded PCM source for the broadcast
//!
//! Opens the MP3 source file with symphonia and yields stereo f64 chunks
//! at the broadcast sample rate, inserting a resampler when the file's
//! native rate differs. Mono sources are duplicated onto both channels.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::resampler::StereoResampler;
use crate::config::ResampleQuality;
use crate::error::AudioError;

/// A decoded, rate-corrected stereo stream read chunk by chunk
pub struct FileSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f64>>,
    resampler: Option<StereoResampler>,
    /// Decoded-and-converted samples not yet handed to the caller
    pending_left: Vec<f64>,
    pending_right: Vec<f64>,
    source_rate: u32,
    target_rate: u32,
    eof: bool,
}

impl FileSource {
    /// Open `path` and prepare a stream at `target_rate`.
    pub fn open(
        path: &str,
        target_rate: u32,
        quality: ResampleQuality,
    ) -> Result<Self, AudioError> {
        let source_open = |reason: String| AudioError::SourceOpen {
            path: path.to_string(),
            reason,
        };

        let file = File::open(Path::new(path)).map_err(|e| source_open(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| source_open(e.to_string()))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(AudioError::NoAudioTrack)?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
        let source_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioError::DecodeFailed("source sample rate unknown".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::DecodeFailed(e.to_string()))?;

        let resampler = if source_rate != target_rate {
            Some(StereoResampler::new(source_rate, target_rate, quality)?)
        } else {
            None
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_buf: None,
            resampler,
            pending_left: Vec::new(),
            pending_right: Vec::new(),
            source_rate,
            target_rate,
            eof: false,
        })
    }

    /// Native rate of the source file
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Rate of the samples handed out by [`read_chunk`](Self::read_chunk)
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Read up to `max` stereo samples at the target rate.
    ///
    /// Returns `None` once the stream is exhausted.
    pub fn read_chunk(
        &mut self,
        max: usize,
    ) -> Result<Option<(Vec<f64>, Vec<f64>)>, AudioError> {
        while self.pending_left.len() < max && !self.eof {
            match self.decode_next()? {
                Some((left, right)) => {
                    let (left, right) = match &mut self.resampler {
                        Some(rs) => rs.process(&left, &right)?,
                        None => (left, right),
                    };
                    self.pending_left.extend(left);
                    self.pending_right.extend(right);
                }
                None => self.eof = true,
            }
        }

        if self.pending_left.is_empty() {
            return Ok(None);
        }

        let take = max.min(self.pending_left.len());
        let left: Vec<f64> = self.pending_left.drain(..take).collect();
        let right: Vec<f64> = self.pending_right.drain(..take).collect();

        Ok(Some((left, right)))
    }

    /// Decode the next packet of our track into split channel buffers.
    fn decode_next(&mut self) -> Result<Option<(Vec<f64>, Vec<f64>)>, AudioError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // a corrupt packet is recoverable; skip it
                Err(SymphoniaError::DecodeError(reason)) => {
                    tracing::warn!("skipping undecodable packet: {reason}");
                    continue;
                }
                Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
            };

            if self.sample_buf.is_none() {
                self.sample_buf = Some(SampleBuffer::<f64>::new(
                    decoded.capacity() as u64,
                    *decoded.spec(),
                ));
            }

            let buf = match self.sample_buf.as_mut() {
                Some(buf) => buf,
                None => continue,
            };
            buf.copy_interleaved_ref(decoded);
            let samples = buf.samples();

            let frames = samples.len() / self.channels.max(1);
            let mut left = Vec::with_capacity(frames);
            let mut right = Vec::with_capacity(frames);

            if self.channels >= 2 {
                for pair in samples.chunks_exact(self.channels) {
                    left.push(pair[0]);
                    right.push(pair[1]);
                }
            } else {
                for &s in samples {
                    left.push(s);
                    right.push(s);
                }
            }

            return Ok(Some((left, right)));
        }
    }
}
