//! REST endpoints for project-scoped bulk session operations.
//!
//! - `GET    /api/projects/{id}/sessions` — list a project's sessions
//! - `POST   /api/projects/{id}/suspend`  — suspend all active sessions
//! - `POST   /api/projects/{id}/resume`   — resume suspended sessions
//! - `DELETE /api/projects/{id}/sessions` — close everything (teardown)

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::registry::session::ResumeResult;
use crate::AppState;

/// `GET /api/projects/{id}/sessions` — all sessions of a project, plus the
/// current focus order. An unknown project is just an empty list.
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<Value> {
    let (sessions, ui_state) = state.registry.list_project_sessions(&project_id).await;
    Json(json!({
        "sessions": sessions,
        "ui_state": ui_state,
    }))
}

/// `POST /api/projects/{id}/suspend` — suspend every active session.
/// Idempotent: already-suspended sessions are not counted again.
pub async fn suspend_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<Value> {
    let suspended = state.registry.suspend_project_sessions(&project_id).await;
    Json(json!({
        "ok": true,
        "project_id": project_id,
        "suspended": suspended,
    }))
}

/// `POST /api/projects/{id}/resume` — resume suspended sessions, returning
/// each session's buffered output (drained) and the project's focus order.
pub async fn resume_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<ResumeResult> {
    Json(state.registry.resume_project_sessions(&project_id).await)
}

/// `DELETE /api/projects/{id}/sessions` — close all of a project's
/// sessions. Returns how many live sessions were closed; a repeat is 0.
pub async fn cleanup_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<Value> {
    let closed = state.registry.cleanup_project_sessions(&project_id).await;
    Json(json!({
        "ok": true,
        "project_id": project_id,
        "closed": closed,
    }))
}
