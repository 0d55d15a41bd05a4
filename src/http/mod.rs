//! HTTP API for local control of voice sessions (browser UI)
//!
//! - POST /sessions - Connect a new session with an ephemeral credential
//! - GET /sessions/:id - Session stats and recent events
//! - POST /sessions/:id/text - Send user text
//! - DELETE /sessions/:id - Disconnect and forget the session
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::status_for;
pub use routes::create_router;
pub use state::{AppState, BuiltSession, ManagedSession, SessionFactory, SessionMap};
