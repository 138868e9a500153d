//! WebSocket transport bridging terminal sessions to browser clients.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /api/ws?token=<api_key>` — the token is
//!    validated before the upgrade completes.
//! 2. All messages are JSON objects with a `"type"` field. One connection
//!    may join any number of session rooms.
//! 3. On disconnect the socket leaves every room it joined. An empty room
//!    does **not** close its session — reconnect-and-rejoin is the normal
//!    flow; the registry sweep applies the optional grace window.
//!
//! ## Message types (client → server)
//!
//! | Type     | Fields                        | Response                          |
//! |----------|-------------------------------|-----------------------------------|
//! | `ping`   | `session_id?`                 | `pong`                            |
//! | `join`   | `session_id`                  | `joined` or `error`               |
//! | `data`   | `session_id`, `content`       | (none on success, `error` on failure) |
//! | `resize` | `session_id`, `rows`, `cols`  | `resize` to the room, or `error`  |
//! | `cwd`    | `session_id`, `path`          | (none on success, `error` on failure) |
//!
//! ## Message types (server → client)
//!
//! | Type          | Key fields                          |
//! |---------------|-------------------------------------|
//! | `pong`        | `session_id?`                       |
//! | `joined`      | `session_id`, `session`             |
//! | `data`        | `session_id`, `content`             |
//! | `resize`      | `session_id`, `rows`, `cols`        |
//! | `exit`        | `session_id`, `code`, `signal`      |
//! | `closed`      | `session_id`, `reason`              |
//! | `force-close` | `session_id`                        |
//! | `error`       | `code`, `message`, `session_id?`    |
//!
//! Failures on `data`/`resize` are scoped to the session: the client gets
//! an `error` event, the connection stays up.

use std::collections::HashMap;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::error::RegistryError;
use crate::registry::session::RoomEvent;
use crate::AppState;

/// Query parameters for the WebSocket upgrade request.
#[derive(Deserialize)]
pub struct WsQuery {
    /// API key passed as a query parameter (HTTP headers aren't available
    /// during a browser WebSocket upgrade).
    pub token: String,
}

/// `GET /api/ws?token=<key>` — WebSocket upgrade handler.
///
/// Validates the token before upgrading. Returns `403 Forbidden` on auth
/// failure.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !crate::auth::constant_time_eq(state.config.auth.api_key.as_bytes(), query.token.as_bytes())
    {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Build a client-scoped `error` event from a registry error.
fn error_event(err: &RegistryError, session_id: Option<&str>) -> Value {
    let mut event = json!({
        "type": "error",
        "code": err.code(),
        "message": err.to_string(),
    });
    if let Some(id) = session_id {
        event["session_id"] = json!(id);
    }
    event
}

/// Background task forwarding one room's events to the socket.
///
/// Ends when the room closes (session removed), on `force-close`, or when
/// the socket's outgoing channel is gone.
async fn room_forwarder(
    session_id: String,
    mut events: broadcast::Receiver<RoomEvent>,
    ws_tx: mpsc::Sender<Value>,
) {
    loop {
        let msg = match events.recv().await {
            Ok(RoomEvent::Data(content)) => json!({
                "type": "data",
                "session_id": session_id,
                "content": content,
            }),
            Ok(RoomEvent::Resize { rows, cols }) => json!({
                "type": "resize",
                "session_id": session_id,
                "rows": rows,
                "cols": cols,
            }),
            Ok(RoomEvent::Exit { code, signal }) => json!({
                "type": "exit",
                "session_id": session_id,
                "code": code,
                "signal": signal,
            }),
            Ok(RoomEvent::Closed { reason }) => json!({
                "type": "closed",
                "session_id": session_id,
                "reason": reason,
            }),
            Ok(RoomEvent::ForceClose) => {
                let _ = ws_tx
                    .send(json!({"type": "force-close", "session_id": session_id}))
                    .await;
                return;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Room {session_id}: socket lagged, skipped {skipped} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if ws_tx.send(msg).await.is_err() {
            return; // WS closed
        }
    }
}

/// Main WebSocket event loop.
///
/// Splits the socket into a sink (outgoing) and stream (incoming).
/// Outgoing messages are funneled through an mpsc channel so room
/// forwarder tasks can send without holding a reference to the socket.
async fn handle_ws(socket: axum::extract::ws::WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Channel for sending messages back to the WebSocket
    let (tx, mut rx) = mpsc::channel::<Value>(256);

    // session_id → forwarder task, for room cleanup on disconnect
    let mut joined_rooms: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

    info!("WebSocket client connected");

    // Task: forward channel messages to the WebSocket sink
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!("WS send: failed to serialize message: {e}");
                    continue;
                }
            };
            if ws_sink
                .send(axum::extract::ws::Message::Text(text.into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        let text = match msg {
            axum::extract::ws::Message::Text(text) => text,
            axum::extract::ws::Message::Close(_) => break,
            _ => continue,
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
            let _ = tx
                .send(json!({
                    "type": "error",
                    "code": "INVALID_JSON",
                    "message": "Failed to parse JSON message"
                }))
                .await;
            continue;
        };

        dispatch(&state, &tx, &mut joined_rooms, &parsed).await;
    }

    // Disconnect: leave every joined room. Sessions stay alive.
    for (session_id, task) in joined_rooms {
        task.abort();
        state.registry.leave_room(&session_id).await;
    }
    send_task.abort();
    info!("WebSocket client disconnected");
}

/// Handle one parsed client message. Malformed requests always get a
/// client-scoped `error` reply; the connection itself is never dropped.
async fn dispatch(
    state: &AppState,
    tx: &mpsc::Sender<Value>,
    joined_rooms: &mut HashMap<String, tokio::task::JoinHandle<()>>,
    parsed: &Value,
) {
    let msg_type = parsed["type"].as_str().unwrap_or("");

    match msg_type {
        "ping" => {
            let mut resp = json!({"type": "pong"});
            if let Some(id) = parsed["session_id"].as_str() {
                resp["session_id"] = json!(id);
            }
            let _ = tx.send(resp).await;
        }
        "join" => {
            let session_id = parsed["session_id"].as_str().unwrap_or("");
            if session_id.is_empty() {
                let _ = tx
                    .send(json!({
                        "type": "error",
                        "code": "MISSING_FIELD",
                        "message": "session_id is required"
                    }))
                    .await;
                return;
            }

            // Re-joining replaces the previous membership.
            if let Some(task) = joined_rooms.remove(session_id) {
                task.abort();
                state.registry.leave_room(session_id).await;
            }

            match state.registry.join_room(session_id).await {
                Ok(sub) => {
                    let _ = tx
                        .send(json!({
                            "type": "joined",
                            "session_id": session_id,
                            "session": sub.session,
                        }))
                        .await;
                    let task = tokio::spawn(room_forwarder(
                        session_id.to_string(),
                        sub.events,
                        tx.clone(),
                    ));
                    joined_rooms.insert(session_id.to_string(), task);
                }
                Err(e) => {
                    let _ = tx.send(error_event(&e, Some(session_id))).await;
                }
            }
        }
        "data" => {
            let session_id = parsed["session_id"].as_str().unwrap_or("");
            let content = parsed["content"].as_str().unwrap_or("");
            if session_id.is_empty() {
                let _ = tx
                    .send(json!({
                        "type": "error",
                        "code": "MISSING_FIELD",
                        "message": "session_id is required"
                    }))
                    .await;
                return;
            }
            if let Err(e) = state.registry.write_session(session_id, content).await {
                let _ = tx.send(error_event(&e, Some(session_id))).await;
            }
        }
        "resize" => {
            let session_id = parsed["session_id"].as_str().unwrap_or("");
            #[allow(clippy::cast_possible_truncation)]
            let rows = parsed["rows"].as_u64().unwrap_or(0) as u16;
            #[allow(clippy::cast_possible_truncation)]
            let cols = parsed["cols"].as_u64().unwrap_or(0) as u16;
            if session_id.is_empty() || rows == 0 || cols == 0 {
                let _ = tx
                    .send(json!({
                        "type": "error",
                        "code": "MISSING_FIELD",
                        "message": "session_id, rows, and cols are required"
                    }))
                    .await;
                return;
            }
            if let Err(e) = state.registry.resize_session(session_id, rows, cols).await {
                let _ = tx.send(error_event(&e, Some(session_id))).await;
            }
        }
        "cwd" => {
            let session_id = parsed["session_id"].as_str().unwrap_or("");
            let path = parsed["path"].as_str().unwrap_or("");
            if session_id.is_empty() || path.is_empty() {
                let _ = tx
                    .send(json!({
                        "type": "error",
                        "code": "MISSING_FIELD",
                        "message": "session_id and path are required"
                    }))
                    .await;
                return;
            }
            if let Err(e) = state.registry.set_working_directory(session_id, path).await {
                let _ = tx.send(error_event(&e, Some(session_id))).await;
            }
        }
        other => {
            let _ = tx
                .send(json!({
                    "type": "error",
                    "code": "UNKNOWN_TYPE",
                    "message": format!("Unknown message type: {other}")
                }))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use crate::config::Config;
    use crate::proc::{ProcessEvent, ProcessFactory, SessionProcess, SpawnedProcess};
    use crate::registry::session::SessionKind;
    use crate::registry::SessionRegistry;

    struct NullProcess;

    impl SessionProcess for NullProcess {
        fn write(&self, _data: &str) -> Result<(), String> {
            Ok(())
        }
        fn resize(&self, _rows: u16, _cols: u16) -> Result<(), String> {
            Ok(())
        }
        fn kill(&self) {}
        fn pid(&self) -> u32 {
            0
        }
    }

    struct NullFactory;

    impl ProcessFactory for NullFactory {
        fn spawn(
            &self,
            _session_id: &str,
            _kind: SessionKind,
            _working_dir: &str,
        ) -> Result<SpawnedProcess, String> {
            let (_events_tx, events) = mpsc::channel::<ProcessEvent>(8);
            Ok(SpawnedProcess {
                handle: Box::new(NullProcess),
                events,
            })
        }
    }

    fn test_state() -> AppState {
        let config: Config = toml::from_str("").unwrap();
        let registry = SessionRegistry::new(config.session.clone(), Arc::new(NullFactory));
        AppState {
            config: Arc::new(config),
            start_time: Instant::now(),
            registry,
        }
    }

    async fn send(state: &AppState, msg: Value) -> Value {
        let (tx, mut rx) = mpsc::channel(8);
        let mut rooms = HashMap::new();
        dispatch(state, &tx, &mut rooms, &msg).await;
        rx.recv().await.expect("reply")
    }

    #[tokio::test]
    async fn test_ping_echoes_session_id() {
        let state = test_state();
        let reply = send(&state, json!({"type": "ping", "session_id": "s1"})).await;
        assert_eq!(reply["type"], "pong");
        assert_eq!(reply["session_id"], "s1");
    }

    #[tokio::test]
    async fn test_data_without_session_id_yields_error() {
        let state = test_state();
        let reply = send(&state, json!({"type": "data", "content": "ls\r"})).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "MISSING_FIELD");
    }

    #[tokio::test]
    async fn test_cwd_without_path_yields_error() {
        let state = test_state();
        let reply = send(&state, json!({"type": "cwd", "session_id": "s1"})).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "MISSING_FIELD");
    }

    #[tokio::test]
    async fn test_join_unknown_session_yields_error() {
        let state = test_state();
        let reply = send(&state, json!({"type": "join", "session_id": "missing"})).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "SESSION_NOT_FOUND");
        assert_eq!(reply["session_id"], "missing");
    }

    #[tokio::test]
    async fn test_unknown_type_yields_error() {
        let state = test_state();
        let reply = send(&state, json!({"type": "frobnicate"})).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "UNKNOWN_TYPE");
    }

    #[tokio::test]
    async fn test_data_reaches_live_session() {
        let state = test_state();
        let session = state
            .registry
            .create_session("p1", "/", None, SessionKind::System)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut rooms = HashMap::new();
        dispatch(
            &state,
            &tx,
            &mut rooms,
            &json!({"type": "data", "session_id": session.id, "content": "ls\r"}),
        )
        .await;
        // No error event on success.
        assert!(rx.try_recv().is_err());
    }
}
