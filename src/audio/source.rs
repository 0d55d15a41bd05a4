use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::info;

/// Why the microphone could not be opened
#[derive(Debug, Error)]
pub enum AudioInputError {
    /// The user (or OS) refused access to the input device
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// No usable input: missing device/file or unsupported format
    #[error("audio input unavailable: {0}")]
    Unavailable(String),
}

/// Pull-based stream of float samples in [-1.0, 1.0] (mono)
#[async_trait]
pub trait AudioSampleSource: Send {
    /// Next batch of samples, or `None` once the source is exhausted
    async fn next_chunk(&mut self) -> Option<Vec<f32>>;

    /// Sample rate of the delivered samples
    fn sample_rate(&self) -> u32;
}

/// Local audio input device (microphone)
///
/// Opening the device is where permission is requested, so a denied
/// permission surfaces from `open` and never later.
#[async_trait]
pub trait AudioInput: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AudioSampleSource>, AudioInputError>;

    /// Input name for logging
    fn name(&self) -> &str;
}

/// WAV file standing in for a microphone
///
/// Multi-channel files are mixed down to mono. With `realtime` enabled, each
/// chunk is released at the pace it would arrive from a real device.
#[derive(Debug, Clone)]
pub struct WavFileInput {
    path: PathBuf,
    expected_sample_rate: u32,
    chunk_duration: Duration,
    realtime: bool,
}

impl WavFileInput {
    pub fn new(path: impl AsRef<Path>, expected_sample_rate: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            expected_sample_rate,
            chunk_duration: Duration::from_millis(20),
            realtime: true,
        }
    }

    pub fn with_chunk_duration(mut self, chunk_duration: Duration) -> Self {
        self.chunk_duration = chunk_duration;
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn read_samples(&self) -> Result<(Vec<f32>, u32), AudioInputError> {
        let reader = hound::WavReader::open(&self.path).map_err(|e| match e {
            hound::Error::IoError(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                AudioInputError::PermissionDenied(format!("{}: {}", self.path.display(), io))
            }
            other => AudioInputError::Unavailable(format!("{}: {}", self.path.display(), other)),
        })?;

        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AudioInputError::Unavailable(e.to_string()))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| AudioInputError::Unavailable(e.to_string()))?
            }
        };

        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok((mono, spec.sample_rate))
    }
}

#[async_trait]
impl AudioInput for WavFileInput {
    async fn open(&self) -> Result<Box<dyn AudioSampleSource>, AudioInputError> {
        let (samples, sample_rate) = self.read_samples()?;

        if sample_rate != self.expected_sample_rate {
            return Err(AudioInputError::Unavailable(format!(
                "{} is {}Hz, session expects {}Hz",
                self.path.display(),
                sample_rate,
                self.expected_sample_rate
            )));
        }

        let chunk_len =
            ((sample_rate as u128 * self.chunk_duration.as_millis()) / 1000).max(1) as usize;

        info!(
            "Opened WAV input {}: {:.1}s @ {}Hz ({} samples/chunk)",
            self.path.display(),
            samples.len() as f64 / sample_rate as f64,
            sample_rate,
            chunk_len
        );

        let pacer = if self.realtime {
            let mut ticker = interval(self.chunk_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        } else {
            None
        };

        Ok(Box::new(BufferedSource {
            samples,
            position: 0,
            chunk_len,
            sample_rate,
            pacer,
        }))
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

/// Samples held in memory, handed out chunk by chunk
struct BufferedSource {
    samples: Vec<f32>,
    position: usize,
    chunk_len: usize,
    sample_rate: u32,
    pacer: Option<Interval>,
}

#[async_trait]
impl AudioSampleSource for BufferedSource {
    async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        if self.position >= self.samples.len() {
            return None;
        }

        if let Some(pacer) = &mut self.pacer {
            pacer.tick().await;
        }

        let end = (self.position + self.chunk_len).min(self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Some(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
