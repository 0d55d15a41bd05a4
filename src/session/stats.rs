use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::ConnectionState;
use crate::watchdog::InactivityStatus;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub state: ConnectionState,

    /// Identifier of the current (or last) connection attempt
    pub connection_id: Option<String>,

    /// When the session reached `connected`
    pub connected_at: Option<DateTime<Utc>>,

    /// Seconds since `connected_at`
    pub duration_secs: f64,

    /// Microphone frames handed to the transport
    pub frames_sent: u64,

    /// Remote audio frames delivered to the output device
    pub frames_received: u64,

    pub messages_sent: u64,

    pub messages_received: u64,

    /// Inbound messages dropped because they failed to parse
    pub malformed_messages: u64,

    pub inactivity: InactivityStatus,

    pub missed_pongs: u32,
}
