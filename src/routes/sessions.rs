//! REST endpoints for individual sessions.
//!
//! - `POST   /api/sessions`            — create a session
//! - `GET    /api/sessions/{id}`       — fetch a session snapshot
//! - `DELETE /api/sessions/{id}`       — close a session
//! - `POST   /api/sessions/{id}/focus` — toggle focus

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RegistryError;
use crate::registry::session::{SessionInfo, SessionKind};
use crate::util::expand_tilde;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub project_id: String,
    /// Defaults to `[shell].default_working_dir`; `~` is expanded.
    pub working_dir: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub kind: SessionKind,
}

/// `POST /api/sessions` — spawn a new terminal session.
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionInfo>), RegistryError> {
    let working_dir = payload
        .working_dir
        .as_deref()
        .unwrap_or(&state.config.shell.default_working_dir);
    let working_dir = expand_tilde(working_dir);

    let session = state
        .registry
        .create_session(
            &payload.project_id,
            &working_dir,
            payload.user_id.as_deref(),
            payload.kind,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// `GET /api/sessions/{id}` — session snapshot.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, RegistryError> {
    state
        .registry
        .get_session(&id)
        .await
        .map(Json)
        .ok_or(RegistryError::SessionNotFound(id))
}

/// `DELETE /api/sessions/{id}` — close a session and remove it.
///
/// A repeated delete reports 404: closing is idempotent in effect but the
/// second caller learns the session is gone.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, RegistryError> {
    if !state.registry.close_session(&id).await {
        return Err(RegistryError::SessionNotFound(id));
    }
    Ok(Json(json!({
        "ok": true,
        "session_id": id,
    })))
}

#[derive(Deserialize)]
pub struct FocusRequest {
    #[serde(default = "default_focused")]
    pub focused: bool,
}

fn default_focused() -> bool {
    true
}

/// `POST /api/sessions/{id}/focus` — toggle focus.
///
/// Focusing past the per-project cap is not an error; the evicted session
/// id is reported in the response together with the resulting focus order.
pub async fn focus_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FocusRequest>,
) -> Result<Json<Value>, RegistryError> {
    let change = state.registry.set_session_focus(&id, payload.focused).await?;

    // The focus order is project-scoped; look the project up for the reply.
    let focused_sessions = match state.registry.get_session(&id).await {
        Some(session) => state.registry.get_focused_sessions(&session.project_id).await,
        None => Vec::new(),
    };

    let mut body = json!({
        "ok": true,
        "session_id": id,
        "focused": change.focused,
        "focused_sessions": focused_sessions,
    });
    if let Some(evicted) = change.evicted {
        body["evicted"] = json!(evicted);
    }
    Ok(Json(body))
}
