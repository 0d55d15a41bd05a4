pub mod capture;
pub mod encoder;
pub mod frame;
pub mod output;
pub mod source;

pub use capture::{spawn_capture, CaptureSummary};
pub use encoder::{quantize, AudioFrameEncoder, EncoderConfig};
pub use frame::AudioFrame;
pub use output::{AudioOutput, NullOutput, WavFileOutput};
pub use source::{AudioInput, AudioInputError, AudioSampleSource, WavFileInput};
