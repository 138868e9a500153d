//! Session record types shared between the registry, the event router, and
//! the WebSocket layer.
//!
//! The mutable output path (`status` + suspend buffer) lives behind one
//! mutex in [`SessionShared`] so the routing task and registry operations
//! always observe a consistent pair: a chunk is either buffered because the
//! session *is* suspended, or broadcast because it is not — never both.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use super::buffer::{OutputChunk, SuspendBuffer};

/// What kind of process backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Login shell.
    System,
    /// AI-CLI-backed session.
    Claude,
}

impl Default for SessionKind {
    fn default() -> Self {
        Self::System
    }
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Suspended,
    /// Terminal state — a closed id is never reused.
    Closed,
}

/// Exit details reported by the backing process.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Events fanned out to every socket joined to a session's room.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Live output chunk.
    Data(String),
    /// PTY was resized; sibling tabs mirror the new geometry.
    Resize { rows: u16, cols: u16 },
    /// The backing process exited. Terminal for the session.
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The session was closed by the registry.
    Closed { reason: &'static str },
    /// Clients must drop their tab for this session immediately.
    ForceClose,
}

/// State guarded together so the output path is race-free.
#[derive(Debug)]
pub struct SessionState {
    pub status: SessionStatus,
    pub buffer: SuspendBuffer,
    pub exit: Option<SessionExit>,
}

/// The part of a session shared with its event-routing task.
#[derive(Debug)]
pub struct SessionShared {
    pub state: Mutex<SessionState>,
    /// The session's room. Subscribing = joining.
    pub room_tx: broadcast::Sender<RoomEvent>,
}

impl SessionShared {
    pub fn new(suspend_buffer_size: usize) -> Arc<Self> {
        let (room_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                buffer: SuspendBuffer::new(suspend_buffer_size),
                exit: None,
            }),
            room_tx,
        })
    }
}

/// Wire-facing snapshot of a session, returned by the HTTP and WS layers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub project_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub is_focused: bool,
    pub working_directory: String,
    pub pid: u32,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<SessionExit>,
}

/// Focus order for a project, returned to the UI so it knows which
/// sessions to stream.
#[derive(Debug, Clone, Serialize)]
pub struct UiState {
    pub focused_sessions: Vec<String>,
}

/// Outcome of a focus toggle.
#[derive(Debug, Clone, Serialize)]
pub struct FocusChange {
    pub focused: bool,
    /// Session evicted from the focused set to make room, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted: Option<String>,
}

/// One session's share of a project resume.
#[derive(Debug, Serialize)]
pub struct ResumedSession {
    #[serde(flatten)]
    pub info: SessionInfo,
    /// Chunks captured while suspended, in emission order. Drained — the
    /// buffer is empty after resume.
    pub buffered_output: Vec<OutputChunk>,
    /// Chunks evicted from the ring while suspended (scrollback gap).
    pub dropped: u64,
}

/// Result of resuming a project's sessions.
#[derive(Debug, Serialize)]
pub struct ResumeResult {
    pub resumed: usize,
    pub sessions: Vec<ResumedSession>,
    pub ui_state: UiState,
}
