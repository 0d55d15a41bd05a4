use super::state::{AppState, ManagedSession};
use crate::session::{SessionError, SessionEvent, SessionStats};
use crate::transport::EphemeralCredential;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Ephemeral credential issued by the token service
    pub credential: String,

    /// Optional credential expiry
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub stats: SessionStats,
    pub recent_events: Vec<SessionEvent>,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_id),
    )
}

/// HTTP status for a session failure
pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::CredentialMissing | SessionError::CredentialExpired => StatusCode::BAD_REQUEST,
        SessionError::CredentialRejected { .. } => StatusCode::UNAUTHORIZED,
        SessionError::MicrophoneDenied(_) => StatusCode::FORBIDDEN,
        SessionError::AudioInputUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::NegotiationFailed { .. }
        | SessionError::InvalidAnswer(_)
        | SessionError::Network(_)
        | SessionError::Transport(_) => StatusCode::BAD_GATEWAY,
        SessionError::InvalidConfig(_) | SessionError::Encode(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SessionError::NotConnected | SessionError::AlreadyActive(_) | SessionError::Aborted => {
            StatusCode::CONFLICT
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Start a new voice session
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!("Starting voice session: {}", session_id);

    let built = match state.factory.build(&session_id) {
        Ok(built) => built,
        Err(e) => {
            error!("Failed to create session: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create session: {}", e),
            );
        }
    };

    let mut credential = EphemeralCredential::new(req.credential);
    if let Some(expires_at) = req.expires_at {
        credential = credential.with_expiry(expires_at);
    }

    let session = ManagedSession::start(session_id.clone(), built, &state.sessions);

    if let Err(e) = session.client.connect(credential).await {
        error!("Failed to connect session {}: {}", session_id, e);
        session.close().await;
        return error_response(status_for(&e), format!("Failed to connect: {}", e));
    }

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id.clone(), session);
    }

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id: session_id.clone(),
            status: "connected".to_string(),
            message: format!("Voice session {} connected", session_id),
        }),
    )
        .into_response()
}

/// GET /sessions/:session_id
/// Get status of a voice session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (
            StatusCode::OK,
            Json(SessionStatusResponse {
                session_id: session_id.clone(),
                stats: session.client.stats(),
                recent_events: session.recent_events(),
            }),
        )
            .into_response(),
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/text
/// Send user text into the session
pub async fn send_text(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> impl IntoResponse {
    let session = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).cloned()
    };

    let Some(session) = session else {
        return not_found(&session_id);
    };

    match session.client.send_text(&req.text).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(status_for(&e), format!("Failed to send text: {}", e)),
    }
}

/// DELETE /sessions/:session_id
/// Disconnect and forget a voice session
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Ending voice session: {}", session_id);

    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    match session {
        Some(session) => {
            session.close().await;
            (StatusCode::OK, Json(session.client.stats())).into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
