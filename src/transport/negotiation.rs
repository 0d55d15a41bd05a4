use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use super::SessionDescription;

/// Single-use, short-lived bearer credential for one negotiation
///
/// Not `Clone`: `connect` takes it by value, so a credential is spent by the
/// attempt that uses it.
pub struct EphemeralCredential {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl EphemeralCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The raw bearer value
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("value", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The endpoint refused the credential (401/403)
    #[error("credential rejected by negotiation endpoint (status {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Any other non-success status
    #[error("negotiation failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced an HTTP response
    #[error("negotiation request failed: {0}")]
    Network(String),

    #[error("invalid answer from negotiation endpoint: {0}")]
    InvalidAnswer(String),
}

impl NegotiationError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => NegotiationError::Rejected { status, body },
            _ => NegotiationError::Status { status, body },
        }
    }
}

/// Offer/answer exchange with the remote endpoint
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn negotiate(
        &self,
        offer: &SessionDescription,
        credential: &EphemeralCredential,
    ) -> Result<SessionDescription, NegotiationError>;
}

#[derive(Deserialize)]
struct AnswerBody {
    sdp: String,
}

/// Negotiation over HTTP: POST the offer, receive the answer
#[derive(Debug, Clone)]
pub struct HttpNegotiator {
    client: reqwest::Client,
    url: String,
}

impl HttpNegotiator {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Negotiator for HttpNegotiator {
    async fn negotiate(
        &self,
        offer: &SessionDescription,
        credential: &EphemeralCredential,
    ) -> Result<SessionDescription, NegotiationError> {
        debug!("Posting offer to {} ({} bytes)", self.url, offer.sdp.len());

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .header("Content-Type", "application/sdp")
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| NegotiationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NegotiationError::from_status(status.as_u16(), body));
        }

        // The answer may come back as raw SDP or as JSON with an `sdp` field
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| NegotiationError::Network(format!("failed to read answer body: {e}")))?;

        let sdp = if content_type.contains("application/json") {
            serde_json::from_str::<AnswerBody>(&body)
                .map_err(|e| NegotiationError::InvalidAnswer(e.to_string()))?
                .sdp
        } else {
            body
        };

        if sdp.trim().is_empty() {
            return Err(NegotiationError::InvalidAnswer("empty answer".to_string()));
        }

        info!("Negotiation succeeded ({} byte answer)", sdp.len());
        Ok(SessionDescription::answer(sdp))
    }
}

#[derive(Deserialize)]
struct TokenBody {
    value: String,
    /// Unix seconds
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Nested { client_secret: TokenBody },
    Flat(TokenBody),
}

/// Fetch a fresh credential from the token endpoint
pub async fn fetch_credential(
    client: &reqwest::Client,
    url: &str,
) -> anyhow::Result<EphemeralCredential> {
    info!("Requesting ephemeral credential from {}", url);

    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .body("{}")
        .send()
        .await
        .context("Failed to reach token endpoint")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Token request failed with status {status}: {body}");
    }

    let token: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;

    let body = match token {
        TokenResponse::Nested { client_secret } => client_secret,
        TokenResponse::Flat(body) => body,
    };

    let mut credential = EphemeralCredential::new(body.value);
    if let Some(expiry) = body.expires_at.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
        credential = credential.with_expiry(expiry);
    }
    Ok(credential)
}
