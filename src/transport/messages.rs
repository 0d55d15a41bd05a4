use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::audio::AudioFrame;

/// Messages the client writes to the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Heartbeat probe; `timestamp` is milliseconds since the Unix epoch
    Ping { timestamp: i64 },
    /// User text input
    Text { text: String },
}

impl ControlMessage {
    pub fn ping_now() -> Self {
        ControlMessage::Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InboundMessage {
    Pong { timestamp: Option<i64> },
    Transcript { text: String, partial: bool },
    AudioLevel { level: f32 },
    ResponseDone,
    Error { message: String },
    /// Any `type` this client does not interpret, kept verbatim
    Other { kind: String, payload: Value },
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has no string `type` field")]
    MissingType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum KnownInbound {
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename = "transcript")]
    Transcript {
        text: String,
        #[serde(default)]
        partial: bool,
    },
    #[serde(rename = "audio_level")]
    AudioLevel { level: f32 },
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { message: String },
}

const KNOWN_TYPES: &[&str] = &["pong", "transcript", "audio_level", "response.done", "error"];

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingType)?
            .to_string();

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Ok(InboundMessage::Other {
                kind,
                payload: value,
            });
        }

        let message = match serde_json::from_value::<KnownInbound>(value)? {
            KnownInbound::Pong { timestamp } => InboundMessage::Pong { timestamp },
            KnownInbound::Transcript { text, partial } => InboundMessage::Transcript { text, partial },
            KnownInbound::AudioLevel { level } => InboundMessage::AudioLevel { level },
            KnownInbound::ResponseDone => InboundMessage::ResponseDone,
            KnownInbound::Error { message } => InboundMessage::Error { message },
        };
        Ok(message)
    }

    pub fn is_pong(&self) -> bool {
        matches!(self, InboundMessage::Pong { .. })
    }
}

/// Audio frame as published on the relay's audio subjects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u64,
    pub pcm: String, // Base64-encoded PCM s16le
    pub sample_rate: u32,
    pub timestamp_us: u64,
}

impl AudioFrameMessage {
    pub fn from_frame(session_id: &str, frame: &AudioFrame) -> Self {
        Self {
            session_id: session_id.to_string(),
            sequence: frame.sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(frame.to_le_bytes()),
            sample_rate: frame.sample_rate,
            timestamp_us: frame.timestamp_us,
        }
    }

    pub fn into_frame(self) -> anyhow::Result<AudioFrame> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(&self.pcm)?;
        AudioFrame::from_le_bytes(&bytes, self.sample_rate, self.sequence, self.timestamp_us)
    }
}
