use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::frame::AudioFrame;

/// Audio output device receiving the remote stream
pub trait AudioOutput: Send + Sync {
    /// Play (or store) one frame of remote audio
    fn play(&self, frame: &AudioFrame) -> Result<()>;

    /// Flush and release the device; further `play` calls are ignored
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Discards remote audio
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn play(&self, _frame: &AudioFrame) -> Result<()> {
        Ok(())
    }
}

/// Records remote audio to a 16-bit mono WAV file
pub struct WavFileOutput {
    path: PathBuf,
    sample_rate: u32,
    writer: Mutex<Option<hound::WavWriter<BufWriter<File>>>>,
    samples_written: Mutex<usize>,
}

impl WavFileOutput {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!("Recording remote audio to {}", path.display());

        Ok(Self {
            path,
            sample_rate,
            writer: Mutex::new(Some(writer)),
            samples_written: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> usize {
        *self.samples_written.lock()
    }
}

impl AudioOutput for WavFileOutput {
    fn play(&self, frame: &AudioFrame) -> Result<()> {
        if frame.sample_rate != self.sample_rate {
            warn!(
                "Remote frame sample rate mismatch: expected {}, got {}. Dropping frame.",
                self.sample_rate, frame.sample_rate
            );
            return Ok(());
        }

        let mut guard = self.writer.lock();
        if let Some(writer) = guard.as_mut() {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
            *self.samples_written.lock() += frame.samples.len();
        }

        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer.finalize().context("Failed to finalize WAV file")?;
            info!(
                "Remote audio saved: {} ({} samples)",
                self.path.display(),
                self.samples_written()
            );
        }
        Ok(())
    }
}

impl Drop for WavFileOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.get_mut().take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
