//! Transport seams for the voice session
//!
//! The session logic only ever talks to these traits:
//! - [`DuplexChannel`] - ordered text messages in both directions (control channel)
//! - [`PeerTransport`] - one negotiated media/data connection
//! - [`PeerConnector`] - builds a fresh transport per connection attempt
//!
//! [`nats`] provides a relay implementation; tests plug in in-memory fakes.

pub mod messages;
pub mod nats;
pub mod negotiation;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::AudioFrame;

pub use messages::{AudioFrameMessage, ControlMessage, InboundMessage, MessageError};
pub use nats::{NatsConnector, NatsPeer};
pub use negotiation::{fetch_credential, EphemeralCredential, HttpNegotiator, NegotiationError, Negotiator};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel is closed")]
    Closed,

    #[error("failed to connect transport: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Bidirectional text message channel
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Next inbound message; `None` once the channel is closed
    ///
    /// Intended for a single reader task.
    async fn recv(&self) -> Option<String>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}

/// One peer connection: an outbound audio track, data channels, and the
/// inbound remote audio stream
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_audio_track(&self) -> Result<(), TransportError>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DuplexChannel>, TransportError>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    async fn send_audio(&self, frame: &AudioFrame) -> Result<(), TransportError>;

    /// Remote audio stream; yields `Some` only on the first call
    fn take_remote_audio(&self) -> Option<mpsc::Receiver<AudioFrame>>;

    /// Tear down the connection and all its channels. Idempotent.
    async fn close(&self);
}

/// Factory for peer transports
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
