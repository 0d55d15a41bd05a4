//! Voice session management
//!
//! This module provides the `VoiceSessionClient` that manages:
//! - Connection setup (microphone, peer transport, offer/answer negotiation)
//! - Microphone uplink and remote audio playback
//! - Connection health (heartbeat) and idle timeout (inactivity watchdog)
//! - Session state, events and statistics

mod client;
mod config;
mod error;
mod events;
mod state;
mod stats;

pub use client::{SessionDeps, VoiceSessionClient};
pub use config::SessionConfig;
pub use error::SessionError;
pub use events::SessionEvent;
pub use state::ConnectionState;
pub use stats::SessionStats;
