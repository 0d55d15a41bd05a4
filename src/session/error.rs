use thiserror::Error;

use super::state::ConnectionState;
use crate::audio::AudioInputError;
use crate::transport::{MessageError, NegotiationError, TransportError};

/// Failures surfaced to the application by the session client
///
/// Setup failures stay distinct so the UI can tell "log in again" from
/// "allow the microphone" from "the service is down".
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no credential supplied")]
    CredentialMissing,

    #[error("credential expired before use")]
    CredentialExpired,

    #[error("credential rejected (status {status}): {body}")]
    CredentialRejected { status: u16, body: String },

    #[error("microphone access denied: {0}")]
    MicrophoneDenied(String),

    #[error("audio input unavailable: {0}")]
    AudioInputUnavailable(String),

    /// The negotiation endpoint answered with a non-success status
    #[error("negotiation failed with status {status}: {body}")]
    NegotiationFailed { status: u16, body: String },

    #[error("invalid negotiation answer: {0}")]
    InvalidAnswer(String),

    /// The negotiation request never got an HTTP response
    #[error("network error during negotiation: {0}")]
    Network(String),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to encode control message: {0}")]
    Encode(#[from] MessageError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("session is not connected")]
    NotConnected,

    #[error("session is already {0}")]
    AlreadyActive(ConnectionState),

    /// `disconnect()` was called while this `connect()` was in flight
    #[error("connect aborted by disconnect")]
    Aborted,
}

impl From<NegotiationError> for SessionError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::Rejected { status, body } => {
                SessionError::CredentialRejected { status, body }
            }
            NegotiationError::Status { status, body } => {
                SessionError::NegotiationFailed { status, body }
            }
            NegotiationError::Network(message) => SessionError::Network(message),
            NegotiationError::InvalidAnswer(message) => SessionError::InvalidAnswer(message),
        }
    }
}

impl From<AudioInputError> for SessionError {
    fn from(err: AudioInputError) -> Self {
        match err {
            AudioInputError::PermissionDenied(message) => SessionError::MicrophoneDenied(message),
            AudioInputError::Unavailable(message) => SessionError::AudioInputUnavailable(message),
        }
    }
}
