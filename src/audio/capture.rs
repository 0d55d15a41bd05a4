// Capture pump: microphone source -> encoder -> frame channel
//
// The pump owns the encoder and its reusable buffer. The only thing that
// crosses into the transport side is the emitted `AudioFrame`, moved through
// the mpsc channel.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::encoder::AudioFrameEncoder;
use super::frame::AudioFrame;
use super::source::AudioSampleSource;

/// Totals reported when the pump stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub samples_captured: u64,
    pub frames_emitted: u64,
}

/// Spawn the capture pump
///
/// Runs until the source is exhausted (the final partial frame is flushed)
/// or the receiving side is dropped.
pub fn spawn_capture(
    mut source: Box<dyn AudioSampleSource>,
    mut encoder: AudioFrameEncoder,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> JoinHandle<CaptureSummary> {
    tokio::spawn(async move {
        let mut summary = CaptureSummary::default();
        info!(
            "Audio capture started ({} samples/frame)",
            encoder.config().frame_size
        );

        while let Some(chunk) = source.next_chunk().await {
            summary.samples_captured += chunk.len() as u64;

            for frame in encoder.push_samples(&chunk) {
                if frame_tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, stopping capture");
                    return summary;
                }
                summary.frames_emitted += 1;
            }
        }

        if let Some(frame) = encoder.flush() {
            if frame_tx.send(frame).await.is_ok() {
                summary.frames_emitted += 1;
            }
        }

        info!(
            "Audio capture finished: {} samples, {} frames",
            summary.samples_captured, summary.frames_emitted
        );
        summary
    })
}
