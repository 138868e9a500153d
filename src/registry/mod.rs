//! Session lifecycle management.
//!
//! [`SessionRegistry`] is the single authority for creating, accessing, and
//! destroying terminal sessions. It is explicitly constructed at startup and
//! handed to both the HTTP and WebSocket layers — no global singleton. It
//! owns:
//!
//! - The session map (id → entry), including each session's process handle.
//! - The per-project [`FocusCoordinator`] (bounded focused set, LRU
//!   eviction).
//! - **Suspend/resume** — a suspended session keeps running; its output is
//!   captured in a bounded buffer and handed back on resume so the client
//!   can rebuild scrollback without replaying the process.
//! - **Rooms** — each session carries a broadcast channel; joining a room is
//!   subscribing to it. The registry tracks member counts so the sweep can
//!   apply the optional disconnect grace window.
//! - **Sweep** — removes sessions whose process exited and closes sessions
//!   whose room has been empty longer than `disconnect_grace_secs`
//!   (`0` disables that, the default).
//!
//! ## Concurrency
//!
//! The map and focus state live behind one `RwLock`. Mutations hold the
//! write lock end to end, so a focus/suspend/resume sequence is fully
//! applied before the next operation observes anything — the async
//! translation of the original's single-threaded event-loop ordering.
//! Closing is unconditional and immediate from the registry's view; process
//! termination is fire-and-forget.

pub mod buffer;
pub mod focus;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::RegistryError;
use crate::proc::{ProcessEvent, ProcessFactory, SessionProcess};
use crate::util::now_ms;
use focus::FocusCoordinator;
use session::{
    FocusChange, ResumeResult, ResumedSession, RoomEvent, SessionExit, SessionInfo, SessionKind,
    SessionShared, SessionStatus, UiState,
};

/// Internal bookkeeping for one session.
struct SessionEntry {
    project_id: String,
    user_id: Option<String>,
    kind: SessionKind,
    is_focused: bool,
    working_directory: String,
    created_at: u64,
    updated_at: u64,
    suspended_at: Option<u64>,
    /// Sockets currently joined to the session's room.
    room_members: usize,
    /// When the room last became (or started) empty, for the grace window.
    empty_since: Instant,
    handle: Box<dyn SessionProcess>,
    shared: Arc<SessionShared>,
    /// Task routing process events into the buffer or the room.
    router_task: tokio::task::JoinHandle<()>,
}

impl SessionEntry {
    async fn info(&self, id: &str) -> SessionInfo {
        let state = self.shared.state.lock().await;
        SessionInfo {
            id: id.to_string(),
            project_id: self.project_id.clone(),
            kind: self.kind,
            status: state.status,
            is_focused: self.is_focused,
            working_directory: self.working_directory.clone(),
            pid: self.handle.pid(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            suspended_at: self.suspended_at,
            user_id: self.user_id.clone(),
            exit: state.exit,
        }
    }

    /// Mark closed. Returns whether the session was already closed.
    async fn mark_closed(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        let was_closed = state.status == SessionStatus::Closed;
        state.status = SessionStatus::Closed;
        was_closed
    }

    /// Broadcast teardown events, kill the process, stop the router.
    fn tear_down(&self, reason: &'static str) {
        let _ = self.shared.room_tx.send(RoomEvent::Closed { reason });
        let _ = self.shared.room_tx.send(RoomEvent::ForceClose);
        self.handle.kill();
        self.router_task.abort();
    }
}

struct Inner {
    sessions: HashMap<String, SessionEntry>,
    focus: FocusCoordinator,
}

/// A socket's membership in one session's room.
#[derive(Debug)]
pub struct RoomSubscription {
    pub session: SessionInfo,
    pub events: broadcast::Receiver<RoomEvent>,
}

/// Manages the pool of terminal sessions.
///
/// Cloneable — all clones share the same inner `Arc<RwLock<...>>`.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Inner>>,
    factory: Arc<dyn ProcessFactory>,
    limits: SessionConfig,
}

impl SessionRegistry {
    pub fn new(limits: SessionConfig, factory: Arc<dyn ProcessFactory>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                sessions: HashMap::new(),
                focus: FocusCoordinator::new(limits.max_focused_per_project),
            })),
            factory,
            limits,
        }
    }

    /// Create a new session: spawn the backing process, register it as
    /// `active` and focused (applying the focus cap).
    ///
    /// Holds the write lock through the entire check-and-insert to prevent
    /// TOCTOU races on the session limit.
    pub async fn create_session(
        &self,
        project_id: &str,
        working_dir: &str,
        user_id: Option<&str>,
        kind: SessionKind,
    ) -> Result<SessionInfo, RegistryError> {
        if project_id.trim().is_empty() {
            return Err(RegistryError::InvalidProject);
        }

        let mut inner = self.inner.write().await;

        if inner.sessions.len() >= self.limits.max_sessions {
            return Err(RegistryError::LimitReached(self.limits.max_sessions));
        }

        let id = Uuid::new_v4().to_string();

        let spawned = self
            .factory
            .spawn(&id, kind, working_dir)
            .map_err(RegistryError::Spawn)?;

        let shared = SessionShared::new(self.limits.suspend_buffer_size);
        let router_task = route_events(id.clone(), Arc::clone(&shared), spawned.events);

        let evicted = inner.focus.focus(project_id, &id);
        if let Some(ref evicted_id) = evicted {
            if let Some(prev) = inner.sessions.get_mut(evicted_id) {
                prev.is_focused = false;
                prev.updated_at = now_ms();
            }
        }

        let now = now_ms();
        let entry = SessionEntry {
            project_id: project_id.to_string(),
            user_id: user_id.map(ToString::to_string),
            kind,
            is_focused: true,
            working_directory: working_dir.to_string(),
            created_at: now,
            updated_at: now,
            suspended_at: None,
            room_members: 0,
            empty_since: Instant::now(),
            handle: spawned.handle,
            shared,
            router_task,
        };

        let session = entry.info(&id).await;
        inner.sessions.insert(id.clone(), entry);

        info!(
            "Session {id} created (project {project_id}, kind {kind:?}, pid {}), total: {}",
            session.pid,
            inner.sessions.len()
        );
        Ok(session)
    }

    /// Snapshot of a session, if it exists.
    pub async fn get_session(&self, id: &str) -> Option<SessionInfo> {
        let inner = self.inner.read().await;
        match inner.sessions.get(id) {
            Some(entry) => Some(entry.info(id).await),
            None => None,
        }
    }

    /// Close and remove a session. Idempotent: returns `false` when the
    /// session is missing or already closed.
    pub async fn close_session(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.remove(id) else {
            return false;
        };
        inner.focus.unfocus(&entry.project_id, id);

        if entry.mark_closed().await {
            // Process already exited; nothing left to tear down.
            entry.router_task.abort();
            return false;
        }
        entry.tear_down("closed");
        info!("Session {id} closed, remaining: {}", inner.sessions.len());
        true
    }

    /// Close every session of a project (project teardown). Returns how
    /// many live (active/suspended) sessions were closed; a second call
    /// returns 0.
    pub async fn cleanup_project_sessions(&self, project_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        let ids: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, e)| e.project_id == project_id)
            .map(|(id, _)| id.clone())
            .collect();

        let mut closed = 0;
        for id in &ids {
            let Some(entry) = inner.sessions.remove(id) else {
                continue;
            };
            if entry.mark_closed().await {
                entry.router_task.abort();
            } else {
                entry.tear_down("project_cleanup");
                closed += 1;
            }
        }
        inner.focus.remove_project(project_id);

        if !ids.is_empty() {
            info!("Project {project_id} cleanup: closed {closed} session(s)");
        }
        closed
    }

    /// Toggle a session's focus. Focusing past the per-project cap evicts
    /// the least-recently-focused session (reported in the result, not an
    /// error).
    pub async fn set_session_focus(
        &self,
        id: &str,
        focused: bool,
    ) -> Result<FocusChange, RegistryError> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.get(id) else {
            return Err(RegistryError::SessionNotFound(id.to_string()));
        };
        if entry.shared.state.lock().await.status == SessionStatus::Closed {
            return Err(RegistryError::SessionClosed(id.to_string()));
        }
        let project_id = entry.project_id.clone();
        let now = now_ms();

        if focused {
            let evicted = inner.focus.focus(&project_id, id);
            if let Some(ref evicted_id) = evicted {
                if let Some(prev) = inner.sessions.get_mut(evicted_id) {
                    prev.is_focused = false;
                    prev.updated_at = now;
                }
            }
            if let Some(entry) = inner.sessions.get_mut(id) {
                entry.is_focused = true;
                entry.updated_at = now;
            }
            Ok(FocusChange {
                focused: true,
                evicted,
            })
        } else {
            inner.focus.unfocus(&project_id, id);
            if let Some(entry) = inner.sessions.get_mut(id) {
                entry.is_focused = false;
                entry.updated_at = now;
            }
            Ok(FocusChange {
                focused: false,
                evicted: None,
            })
        }
    }

    /// Ordered focused session ids for a project (oldest focus first).
    pub async fn get_focused_sessions(&self, project_id: &str) -> Vec<String> {
        self.inner.read().await.focus.focused(project_id)
    }

    /// Suspend every active session of a project. Output produced while
    /// suspended lands in the bounded buffer instead of the room.
    pub async fn suspend_project_sessions(&self, project_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        let now = now_ms();
        let mut suspended = 0;
        for (_, entry) in inner
            .sessions
            .iter_mut()
            .filter(|(_, e)| e.project_id == project_id)
        {
            let mut state = entry.shared.state.lock().await;
            if state.status == SessionStatus::Active {
                state.status = SessionStatus::Suspended;
                entry.suspended_at = Some(now);
                entry.updated_at = now;
                suspended += 1;
            }
        }
        if suspended > 0 {
            info!("Project {project_id}: suspended {suspended} session(s)");
        }
        suspended
    }

    /// Resume every suspended session of a project, draining each buffer so
    /// the client can rebuild terminal scrollback. Buffers are cleared.
    pub async fn resume_project_sessions(&self, project_id: &str) -> ResumeResult {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let focused_sessions = inner.focus.focused(project_id);
        let now = now_ms();

        let mut sessions = Vec::new();
        for (id, entry) in inner
            .sessions
            .iter_mut()
            .filter(|(_, e)| e.project_id == project_id)
        {
            let (buffered_output, dropped) = {
                let mut state = entry.shared.state.lock().await;
                if state.status != SessionStatus::Suspended {
                    continue;
                }
                state.status = SessionStatus::Active;
                let dropped = state.buffer.dropped();
                (state.buffer.drain(), dropped)
            };
            entry.suspended_at = None;
            entry.updated_at = now;

            let info = entry.info(id).await;
            sessions.push(ResumedSession {
                info,
                buffered_output,
                dropped,
            });
        }

        if !sessions.is_empty() {
            info!(
                "Project {project_id}: resumed {} session(s)",
                sessions.len()
            );
        }
        ResumeResult {
            resumed: sessions.len(),
            sessions,
            ui_state: UiState { focused_sessions },
        }
    }

    /// All sessions of a project (stable order: creation time) plus the
    /// current focus order.
    pub async fn list_project_sessions(&self, project_id: &str) -> (Vec<SessionInfo>, UiState) {
        let inner = self.inner.read().await;
        let mut sessions = Vec::new();
        for (id, entry) in inner
            .sessions
            .iter()
            .filter(|(_, e)| e.project_id == project_id)
        {
            sessions.push(entry.info(id).await);
        }
        sessions.sort_by_key(|s| s.created_at);
        let ui_state = UiState {
            focused_sessions: inner.focus.focused(project_id),
        };
        (sessions, ui_state)
    }

    /// Join a session's room: subscribe to its events and count the member
    /// for disconnect-grace bookkeeping.
    pub async fn join_room(&self, id: &str) -> Result<RoomSubscription, RegistryError> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.get_mut(id) else {
            return Err(RegistryError::SessionNotFound(id.to_string()));
        };
        if entry.shared.state.lock().await.status == SessionStatus::Closed {
            return Err(RegistryError::SessionClosed(id.to_string()));
        }
        entry.room_members += 1;
        let events = entry.shared.room_tx.subscribe();
        let session = entry.info(id).await;
        Ok(RoomSubscription { session, events })
    }

    /// Leave a session's room. An empty room does *not* close the session;
    /// it only starts the optional grace window.
    pub async fn leave_room(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.sessions.get_mut(id) {
            entry.room_members = entry.room_members.saturating_sub(1);
            if entry.room_members == 0 {
                entry.empty_since = Instant::now();
            }
        }
    }

    /// Forward client input to a session's process.
    pub async fn write_session(&self, id: &str, data: &str) -> Result<(), RegistryError> {
        let inner = self.inner.read().await;
        let Some(entry) = inner.sessions.get(id) else {
            return Err(RegistryError::SessionNotFound(id.to_string()));
        };
        if entry.shared.state.lock().await.status == SessionStatus::Closed {
            return Err(RegistryError::SessionClosed(id.to_string()));
        }
        entry
            .handle
            .write(data)
            .map_err(|reason| RegistryError::Forwarding {
                id: id.to_string(),
                reason,
            })
    }

    /// Resize a session's PTY; the new geometry is echoed to the room so
    /// sibling tabs stay in sync.
    pub async fn resize_session(
        &self,
        id: &str,
        rows: u16,
        cols: u16,
    ) -> Result<(), RegistryError> {
        let inner = self.inner.read().await;
        let Some(entry) = inner.sessions.get(id) else {
            return Err(RegistryError::SessionNotFound(id.to_string()));
        };
        if entry.shared.state.lock().await.status == SessionStatus::Closed {
            return Err(RegistryError::SessionClosed(id.to_string()));
        }
        entry
            .handle
            .resize(rows, cols)
            .map_err(|reason| RegistryError::Forwarding {
                id: id.to_string(),
                reason,
            })?;
        let _ = entry.shared.room_tx.send(RoomEvent::Resize { rows, cols });
        Ok(())
    }

    /// Record the cwd the client reported for a session.
    pub async fn set_working_directory(&self, id: &str, path: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.get_mut(id) else {
            return Err(RegistryError::SessionNotFound(id.to_string()));
        };
        entry.working_directory = path.to_string();
        entry.updated_at = now_ms();
        Ok(())
    }

    /// Count of tracked sessions (all statuses).
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Periodic sweep:
    ///
    /// 1. **Exited sessions** — the router already marked them closed and
    ///    emitted `exit`; their records are removed.
    /// 2. **Grace-expired sessions** — when `disconnect_grace_secs > 0`,
    ///    sessions whose room has been empty longer than the window are
    ///    closed. `0` (the default) never auto-closes.
    ///
    /// Returns the number of sessions removed.
    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.write().await;
        if inner.sessions.is_empty() {
            return 0;
        }

        let mut dead: Vec<String> = Vec::new();
        for (id, entry) in &inner.sessions {
            if entry.shared.state.lock().await.status == SessionStatus::Closed {
                dead.push(id.clone());
            }
        }
        for id in &dead {
            if let Some(entry) = inner.sessions.remove(id) {
                // The router already sent exit + force-close to the room.
                inner.focus.unfocus(&entry.project_id, id);
                entry.router_task.abort();
                info!("Swept exited session {id}, remaining: {}", inner.sessions.len());
            }
        }
        let mut reaped = dead.len();

        let grace = self.limits.disconnect_grace_secs;
        if grace > 0 {
            let window = Duration::from_secs(grace);
            let expired: Vec<String> = inner
                .sessions
                .iter()
                .filter(|(_, e)| e.room_members == 0 && e.empty_since.elapsed() > window)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                if let Some(entry) = inner.sessions.remove(id) {
                    inner.focus.unfocus(&entry.project_id, id);
                    entry.mark_closed().await;
                    entry.tear_down("disconnect_timeout");
                    warn!("Session {id} closed after {grace}s with no attached client");
                    reaped += 1;
                }
            }
        }

        reaped
    }

    /// Close everything (graceful shutdown).
    pub async fn shutdown(&self) {
        let mut inner = self.inner.write().await;
        let count = inner.sessions.len();
        for (_, entry) in inner.sessions.drain() {
            if !entry.mark_closed().await {
                entry.tear_down("shutdown");
            } else {
                entry.router_task.abort();
            }
        }
        inner.focus = FocusCoordinator::new(self.limits.max_focused_per_project);
        if count > 0 {
            info!("Shut down {count} session(s)");
        }
    }
}

/// Routes process events into the suspend buffer or the room, depending on
/// the session's status at arrival. Exit is terminal: mark closed, emit
/// `exit` then `force-close` to the room, stop.
fn route_events(
    session_id: String,
    shared: Arc<SessionShared>,
    mut events: mpsc::Receiver<ProcessEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Data(chunk) => {
                    let mut state = shared.state.lock().await;
                    match state.status {
                        SessionStatus::Suspended => state.buffer.push(chunk),
                        SessionStatus::Active => {
                            drop(state);
                            // No receivers is fine — an unwatched active
                            // session just drops output on the floor.
                            let _ = shared.room_tx.send(RoomEvent::Data(chunk));
                        }
                        SessionStatus::Closed => {}
                    }
                }
                ProcessEvent::Exit { code, signal } => {
                    {
                        let mut state = shared.state.lock().await;
                        state.exit = Some(SessionExit { code, signal });
                        state.status = SessionStatus::Closed;
                    }
                    let _ = shared.room_tx.send(RoomEvent::Exit { code, signal });
                    // Tear the room down right away so forwarders end and
                    // clients drop their tabs without waiting for the sweep.
                    let _ = shared.room_tx.send(RoomEvent::ForceClose);
                    info!("Session {session_id} process exited (code={code:?}, signal={signal:?})");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
impl SessionRegistry {
    /// Number of chunks currently buffered for a suspended session.
    async fn suspended_len(&self, id: &str) -> usize {
        let inner = self.inner.read().await;
        let entry = inner.sessions.get(id).expect("session exists");
        let len = entry.shared.state.lock().await.buffer.len();
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::SpawnedProcess;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Channel-backed stand-in for a PTY process.
    struct FakeProcess {
        writes: Arc<StdMutex<Vec<String>>>,
        killed: Arc<AtomicBool>,
    }

    impl SessionProcess for FakeProcess {
        fn write(&self, data: &str) -> Result<(), String> {
            self.writes.lock().unwrap().push(data.to_string());
            Ok(())
        }
        fn resize(&self, _rows: u16, _cols: u16) -> Result<(), String> {
            Ok(())
        }
        fn kill(&self) {
            self.killed.store(true, Ordering::SeqCst);
        }
        fn pid(&self) -> u32 {
            0
        }
    }

    /// Factory that hands each test a tap into the session's event stream.
    #[derive(Default)]
    struct FakeFactory {
        taps: StdMutex<HashMap<String, mpsc::Sender<ProcessEvent>>>,
        writes: Arc<StdMutex<Vec<String>>>,
        killed: Arc<AtomicBool>,
    }

    impl FakeFactory {
        fn tap(&self, session_id: &str) -> mpsc::Sender<ProcessEvent> {
            self.taps
                .lock()
                .unwrap()
                .get(session_id)
                .expect("session spawned")
                .clone()
        }
    }

    impl ProcessFactory for FakeFactory {
        fn spawn(
            &self,
            session_id: &str,
            _kind: SessionKind,
            _working_dir: &str,
        ) -> Result<SpawnedProcess, String> {
            let (tx, rx) = mpsc::channel(64);
            self.taps.lock().unwrap().insert(session_id.to_string(), tx);
            Ok(SpawnedProcess {
                handle: Box::new(FakeProcess {
                    writes: Arc::clone(&self.writes),
                    killed: Arc::clone(&self.killed),
                }),
                events: rx,
            })
        }
    }

    fn test_registry(limits: SessionConfig) -> (SessionRegistry, Arc<FakeFactory>) {
        let factory = Arc::new(FakeFactory::default());
        (
            SessionRegistry::new(limits, Arc::clone(&factory) as Arc<dyn ProcessFactory>),
            factory,
        )
    }

    fn default_limits() -> SessionConfig {
        SessionConfig {
            max_sessions: 64,
            max_focused_per_project: 4,
            suspend_buffer_size: 1000,
            disconnect_grace_secs: 0,
            sweep_interval_secs: 30,
        }
    }

    async fn wait_for_buffered(registry: &SessionRegistry, id: &str, n: usize) {
        for _ in 0..100 {
            if registry.suspended_len(id).await >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("buffered output never reached {n} chunks");
    }

    #[tokio::test]
    async fn test_created_session_is_active_and_focused() {
        let (registry, _) = test_registry(default_limits());
        let created = registry
            .create_session("p1", "/tmp", Some("u1"), SessionKind::System)
            .await
            .unwrap();

        let session = registry.get_session(&created.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.is_focused);
        assert_eq!(session.project_id, "p1");
        assert_eq!(session.working_directory, "/tmp");
        assert_eq!(session.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_empty_project_id_rejected() {
        let (registry, _) = test_registry(default_limits());
        let err = registry
            .create_session("  ", "/tmp", None, SessionKind::System)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidProject));
    }

    #[tokio::test]
    async fn test_session_limit() {
        let mut limits = default_limits();
        limits.max_sessions = 1;
        let (registry, _) = test_registry(limits);
        registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        let err = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::LimitReached(1)));
    }

    #[tokio::test]
    async fn test_fifth_focus_evicts_least_recently_focused() {
        let (registry, _) = test_registry(default_limits());
        let mut ids = Vec::new();
        for _ in 0..5 {
            let s = registry
                .create_session("p1", "/", None, SessionKind::System)
                .await
                .unwrap();
            ids.push(s.id);
        }

        // Creation focuses each new session, so S1 was evicted by S5.
        let focused = registry.get_focused_sessions("p1").await;
        assert_eq!(focused.len(), 4);
        assert_eq!(focused, &ids[1..]);
        assert!(!registry.get_session(&ids[0]).await.unwrap().is_focused);
        for id in &ids[1..] {
            assert!(registry.get_session(id).await.unwrap().is_focused);
        }
    }

    #[tokio::test]
    async fn test_refocus_evicted_session_evicts_next_oldest() {
        let (registry, _) = test_registry(default_limits());
        let mut ids = Vec::new();
        for _ in 0..5 {
            let s = registry
                .create_session("p1", "/", None, SessionKind::System)
                .await
                .unwrap();
            ids.push(s.id);
        }

        let change = registry.set_session_focus(&ids[0], true).await.unwrap();
        assert!(change.focused);
        assert_eq!(change.evicted.as_deref(), Some(ids[1].as_str()));
        let focused = registry.get_focused_sessions("p1").await;
        let expected: Vec<String> = [&ids[2], &ids[3], &ids[4], &ids[0]]
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(focused, expected);
    }

    #[tokio::test]
    async fn test_unfocus_and_focus_unknown() {
        let (registry, _) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();

        let change = registry.set_session_focus(&s.id, false).await.unwrap();
        assert!(!change.focused);
        assert!(registry.get_focused_sessions("p1").await.is_empty());
        assert!(!registry.get_session(&s.id).await.unwrap().is_focused);

        let err = registry.set_session_focus("nope", true).await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_suspend_buffers_output_and_resume_drains_in_order() {
        let (registry, factory) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::Claude)
            .await
            .unwrap();

        assert_eq!(registry.suspend_project_sessions("p1").await, 1);
        assert_eq!(
            registry.get_session(&s.id).await.unwrap().status,
            SessionStatus::Suspended
        );

        let tap = factory.tap(&s.id);
        for chunk in ["one\n", "two\n", "three\n"] {
            tap.send(ProcessEvent::Data(chunk.to_string()))
                .await
                .unwrap();
        }
        wait_for_buffered(&registry, &s.id, 3).await;

        let result = registry.resume_project_sessions("p1").await;
        assert_eq!(result.resumed, 1);
        assert_eq!(result.sessions.len(), 1);
        let resumed = &result.sessions[0];
        assert_eq!(resumed.info.id, s.id);
        assert_eq!(resumed.info.status, SessionStatus::Active);
        let data: Vec<&str> = resumed
            .buffered_output
            .iter()
            .map(|c| c.data.as_str())
            .collect();
        assert_eq!(data, ["one\n", "two\n", "three\n"]);
        assert_eq!(resumed.dropped, 0);

        // Buffer was cleared: a second suspend/resume round trips empty.
        registry.suspend_project_sessions("p1").await;
        let again = registry.resume_project_sessions("p1").await;
        assert!(again.sessions[0].buffered_output.is_empty());
    }

    #[tokio::test]
    async fn test_suspend_buffer_ring_eviction() {
        let mut limits = default_limits();
        limits.suspend_buffer_size = 2;
        let (registry, factory) = test_registry(limits);
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        registry.suspend_project_sessions("p1").await;

        let tap = factory.tap(&s.id);
        for chunk in ["a", "b", "c"] {
            tap.send(ProcessEvent::Data(chunk.to_string()))
                .await
                .unwrap();
        }
        wait_for_buffered(&registry, &s.id, 2).await;
        // Give the router a beat to process the third chunk (ring stays at 2).
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = registry.resume_project_sessions("p1").await;
        let resumed = &result.sessions[0];
        let data: Vec<&str> = resumed
            .buffered_output
            .iter()
            .map(|c| c.data.as_str())
            .collect();
        assert_eq!(data, ["b", "c"]);
        assert_eq!(resumed.dropped, 1);
    }

    #[tokio::test]
    async fn test_resume_reports_ui_state() {
        let (registry, _) = test_registry(default_limits());
        let s1 = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        let s2 = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        registry.set_session_focus(&s1.id, false).await.unwrap();

        registry.suspend_project_sessions("p1").await;
        let result = registry.resume_project_sessions("p1").await;
        assert_eq!(result.resumed, 2);
        assert_eq!(result.ui_state.focused_sessions, [s2.id.clone()]);
    }

    #[tokio::test]
    async fn test_live_output_goes_to_room_not_buffer() {
        let (registry, factory) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        let mut sub = registry.join_room(&s.id).await.unwrap();

        factory
            .tap(&s.id)
            .send(ProcessEvent::Data("hello".to_string()))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), sub.events.recv())
            .await
            .expect("room event")
            .unwrap();
        match event {
            RoomEvent::Data(chunk) => assert_eq!(chunk, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(registry.suspended_len(&s.id).await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_counts_then_zero() {
        let (registry, factory) = test_registry(default_limits());
        for _ in 0..3 {
            registry
                .create_session("p1", "/", None, SessionKind::System)
                .await
                .unwrap();
        }
        registry
            .create_session("p2", "/", None, SessionKind::System)
            .await
            .unwrap();
        registry.suspend_project_sessions("p1").await;

        assert_eq!(registry.cleanup_project_sessions("p1").await, 3);
        assert_eq!(registry.cleanup_project_sessions("p1").await, 0);
        // Other project untouched, processes killed for p1.
        assert_eq!(registry.session_count().await, 1);
        assert!(factory.killed.load(Ordering::SeqCst));
        assert!(registry.get_focused_sessions("p1").await.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (registry, _) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();

        assert!(registry.close_session(&s.id).await);
        assert!(!registry.close_session(&s.id).await);
        assert!(!registry.close_session("never-existed").await);
        assert!(registry.get_session(&s.id).await.is_none());
    }

    #[tokio::test]
    async fn test_process_exit_marks_closed_and_sweep_reaps() {
        let (registry, factory) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();

        factory
            .tap(&s.id)
            .send(ProcessEvent::Exit {
                code: Some(0),
                signal: None,
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if registry.get_session(&s.id).await.unwrap().status == SessionStatus::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let session = registry.get_session(&s.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        assert_eq!(session.exit.unwrap().code, Some(0));

        assert_eq!(registry.sweep().await, 1);
        assert!(registry.get_session(&s.id).await.is_none());
        // Closing after exit + sweep is the missing-session case.
        assert!(!registry.close_session(&s.id).await);
    }

    #[tokio::test]
    async fn test_process_exit_force_closes_room() {
        let (registry, factory) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        let mut sub = registry.join_room(&s.id).await.unwrap();

        factory
            .tap(&s.id)
            .send(ProcessEvent::Exit {
                code: Some(1),
                signal: None,
            })
            .await
            .unwrap();

        // The room gets exit followed immediately by force-close; clients
        // never have to wait for the sweep.
        let first = tokio::time::timeout(Duration::from_secs(1), sub.events.recv())
            .await
            .expect("room event")
            .unwrap();
        match first {
            RoomEvent::Exit { code, signal } => {
                assert_eq!(code, Some(1));
                assert_eq!(signal, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let second = tokio::time::timeout(Duration::from_secs(1), sub.events.recv())
            .await
            .expect("room event")
            .unwrap();
        assert!(matches!(second, RoomEvent::ForceClose));
    }

    #[tokio::test]
    async fn test_write_forwards_to_process() {
        let (registry, factory) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        registry.write_session(&s.id, "ls -la\r").await.unwrap();
        assert_eq!(
            factory.writes.lock().unwrap().as_slice(),
            ["ls -la\r".to_string()]
        );

        let err = registry.write_session("nope", "x").await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_resize_echoes_to_room() {
        let (registry, _) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();
        let mut sub = registry.join_room(&s.id).await.unwrap();

        registry.resize_session(&s.id, 50, 132).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), sub.events.recv())
            .await
            .expect("room event")
            .unwrap();
        match event {
            RoomEvent::Resize { rows, cols } => {
                assert_eq!((rows, cols), (50, 132));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_grace_window() {
        let mut limits = default_limits();
        limits.disconnect_grace_secs = 1;
        let (registry, _) = test_registry(limits);
        let s = registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();

        // A joined room is never grace-collected.
        let _sub = registry.join_room(&s.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(registry.sweep().await, 0);

        // Empty room older than the window is closed.
        registry.leave_room(&s.id).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(registry.sweep().await, 1);
        assert!(registry.get_session(&s.id).await.is_none());
    }

    #[tokio::test]
    async fn test_join_room_unknown_session() {
        let (registry, _) = test_registry(default_limits());
        let err = registry.join_room("missing").await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_set_working_directory() {
        let (registry, _) = test_registry(default_limits());
        let s = registry
            .create_session("p1", "~", None, SessionKind::System)
            .await
            .unwrap();
        registry
            .set_working_directory(&s.id, "/srv/app")
            .await
            .unwrap();
        assert_eq!(
            registry.get_session(&s.id).await.unwrap().working_directory,
            "/srv/app"
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (registry, factory) = test_registry(default_limits());
        for _ in 0..3 {
            registry
                .create_session("p1", "/", None, SessionKind::System)
                .await
                .unwrap();
        }
        registry.shutdown().await;
        assert_eq!(registry.session_count().await, 0);
        assert!(factory.killed.load(Ordering::SeqCst));
    }
}
