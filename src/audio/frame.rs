use anyhow::{bail, Result};

/// One transport unit of encoded microphone audio (16-bit PCM, mono)
///
/// Frames are immutable once emitted by the encoder; the capture side keeps
/// reusing its own buffer and hands out copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Encoded samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Position of this frame in the capture stream (0-indexed)
    pub sequence: u64,
    /// Capture timestamp in microseconds since capture started
    pub timestamp_us: u64,
}

impl AudioFrame {
    /// Wire representation: contiguous signed 16-bit little-endian samples
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Rebuild a frame from its wire representation
    pub fn from_le_bytes(
        bytes: &[u8],
        sample_rate: u32,
        sequence: u64,
        timestamp_us: u64,
    ) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            bail!(
                "PCM payload must hold whole 16-bit samples, got {} bytes",
                bytes.len()
            );
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self {
            samples,
            sample_rate,
            sequence,
            timestamp_us,
        })
    }

    /// Duration covered by this frame in milliseconds
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Peak absolute level normalized to [0.0, 1.0]
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .map(|&s| (s as i32).unsigned_abs())
            .max()
            .map(|peak| peak as f32 / 32768.0)
            .unwrap_or(0.0)
    }
}
