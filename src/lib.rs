pub mod audio;
pub mod config;
pub mod heartbeat;
pub mod http;
pub mod session;
pub mod timer;
pub mod transport;
pub mod watchdog;

pub use audio::{
    quantize, AudioFrame, AudioFrameEncoder, AudioInput, AudioInputError, AudioOutput,
    AudioSampleSource, EncoderConfig, NullOutput, WavFileInput, WavFileOutput,
};
pub use config::Config;
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use http::{create_router, AppState, SessionFactory};
pub use session::{
    ConnectionState, SessionConfig, SessionDeps, SessionError, SessionEvent, SessionStats,
    VoiceSessionClient,
};
pub use timer::{Scheduler, TimerHandle};
pub use transport::{
    ControlMessage, DuplexChannel, EphemeralCredential, HttpNegotiator, InboundMessage,
    NatsConnector, Negotiator, PeerConnector, PeerTransport, SessionDescription,
};
pub use watchdog::{InactivityStatus, InactivityWatchdog, WatchdogConfig, WatchdogObserver};
