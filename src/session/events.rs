use serde::Serialize;

use super::state::ConnectionState;
use crate::transport::InboundMessage;

/// Everything the session reports to the application
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: ConnectionState },

    /// Inbound control message (pongs are consumed by the heartbeat)
    Message { message: InboundMessage },

    /// Remote audio-level update
    AudioLevel { level: f32 },

    /// No activity for the silence period; countdown follows
    InactivityWarning,

    Countdown { seconds_remaining: u32 },

    /// Idle timeout reached; the application should call `disconnect()`
    InactivityTimeout,

    /// Heartbeat gave up or the control channel closed underneath us
    ConnectionLost,

    /// An inbound message could not be parsed and was dropped
    MalformedMessage { error: String },
}
