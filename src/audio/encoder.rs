// Float -> PCM16 frame encoder
//
// Microphone callbacks deliver f32 samples in [-1.0, 1.0] in arbitrary
// batch sizes. The encoder quantizes them and cuts the stream into frames of
// exactly `frame_size` samples. Small frames keep end-to-end latency bounded
// at the cost of more transport messages per second.

use anyhow::{bail, Result};
use tracing::debug;

use super::frame::AudioFrame;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Samples per emitted frame
    pub frame_size: usize,
    /// Capture sample rate in Hz (used for frame timestamps)
    pub sample_rate: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,   // ~43ms at 24kHz
            sample_rate: 24000, // Realtime speech models expect 24kHz PCM16
        }
    }
}

/// Quantize one float sample to signed 16-bit PCM
///
/// Negative values scale by 32768 and non-negative values by 32767 so that
/// both ends of [-1.0, 1.0] land exactly on the i16 range without overflow.
pub fn quantize(sample: f32) -> i16 {
    let value = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };

    if value < 0.0 {
        (value * 32768.0).round() as i16
    } else {
        (value * 32767.0).round() as i16
    }
}

/// Fixed-size frame encoder
pub struct AudioFrameEncoder {
    config: EncoderConfig,
    buffer: Vec<i16>,
    index: usize,
    /// Total samples accepted so far (sample clock)
    samples_seen: u64,
    next_sequence: u64,
    last_timestamp_us: Option<u64>,
}

impl AudioFrameEncoder {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        if config.frame_size == 0 {
            bail!("Frame size must be at least one sample");
        }
        if config.sample_rate == 0 {
            bail!("Sample rate must be non-zero");
        }

        debug!(
            "Audio frame encoder: {} samples/frame @ {}Hz",
            config.frame_size, config.sample_rate
        );

        Ok(Self {
            buffer: vec![0; config.frame_size],
            index: 0,
            samples_seen: 0,
            next_sequence: 0,
            last_timestamp_us: None,
            config,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Number of samples waiting for the current frame to fill up
    pub fn pending(&self) -> usize {
        self.index
    }

    /// Append samples, returning every frame completed by this call
    ///
    /// Frames come back in emission order. Empty input is a no-op.
    pub fn push_samples(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        for &sample in samples {
            self.buffer[self.index] = quantize(sample);
            self.index += 1;
            self.samples_seen += 1;

            if self.index == self.config.frame_size {
                frames.push(self.emit(self.config.frame_size));
            }
        }

        frames
    }

    /// Emit whatever is buffered as a final, possibly short, frame
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.index == 0 {
            return None;
        }
        let len = self.index;
        Some(self.emit(len))
    }

    /// Drop buffered samples and restart the sample clock
    pub fn reset(&mut self) {
        self.index = 0;
        self.samples_seen = 0;
        self.next_sequence = 0;
        self.last_timestamp_us = None;
    }

    fn emit(&mut self, len: usize) -> AudioFrame {
        let first_sample = self.samples_seen - len as u64;
        let mut timestamp_us = first_sample * 1_000_000 / self.config.sample_rate as u64;

        // Tiny frames at high rates can round onto the previous timestamp
        if let Some(last) = self.last_timestamp_us {
            if timestamp_us <= last {
                timestamp_us = last + 1;
            }
        }
        self.last_timestamp_us = Some(timestamp_us);

        let frame = AudioFrame {
            samples: self.buffer[..len].to_vec(),
            sample_rate: self.config.sample_rate,
            sequence: self.next_sequence,
            timestamp_us,
        };

        self.next_sequence += 1;
        self.index = 0;
        frame
    }
}
