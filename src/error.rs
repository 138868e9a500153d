//! Registry error taxonomy and HTTP mapping.
//!
//! No variant here is process-fatal: each failure is scoped to the request
//! or connection that triggered it. Focus-cap overflow is deliberately *not*
//! an error — the coordinator evicts silently.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors produced by the session registry and its collaborators.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Operation on an unknown session id.
    #[error("session {0} not found")]
    SessionNotFound(String),
    /// Create request with an empty project id.
    #[error("project id must not be empty")]
    InvalidProject,
    /// Join/write against a session that already reached its terminal state.
    #[error("session {0} is closed")]
    SessionClosed(String),
    /// Write or resize failed against the backing process. The session
    /// remains open; the failure is relayed to the caller.
    #[error("session {id}: {reason}")]
    Forwarding { id: String, reason: String },
    /// The PTY or child process could not be started.
    #[error("failed to spawn session process: {0}")]
    Spawn(String),
    /// The global `max_sessions` cap is reached.
    #[error("session limit reached (max {0})")]
    LimitReached(usize),
}

impl RegistryError {
    /// Stable machine-readable code, shared by HTTP bodies and WS `error`
    /// events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::InvalidProject => "INVALID_PROJECT",
            Self::SessionClosed(_) => "SESSION_CLOSED",
            Self::Forwarding { .. } => "FORWARD_FAILED",
            Self::Spawn(_) => "SPAWN_FAILED",
            Self::LimitReached(_) => "SESSION_LIMIT",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidProject => StatusCode::BAD_REQUEST,
            Self::SessionClosed(_) => StatusCode::CONFLICT,
            Self::Forwarding { .. } => StatusCode::BAD_GATEWAY,
            Self::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::LimitReached(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}
