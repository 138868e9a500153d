#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_async)]

//! # termhub
//!
//! In-memory terminal session manager for project workspaces.
//!
//! termhub spawns PTY-backed shell and AI-CLI sessions, tracks which ones
//! each project has focused (bounded set with LRU eviction), suspends and
//! resumes whole projects with output buffered across the gap, and streams
//! terminal I/O to browser clients over WebSocket rooms. A thin REST
//! surface drives the lifecycle; everything lives in memory — restart the
//! server and the slate is clean.
//!
//! Module map:
//! - `config` — TOML + env-var configuration
//! - `error` — registry error taxonomy and HTTP mapping
//! - `auth` — Bearer token middleware, constant-time comparison
//! - `proc` — process backends (PTY spawn, kind dispatch)
//! - `registry` — session lifecycle: focus, suspend/resume, rooms, sweep
//! - `routes` — REST API route handlers
//! - `ws` — WebSocket protocol handling
//! - `state` — shared application state

pub mod auth;
pub mod config;
pub mod error;
pub mod proc;
pub mod registry;
pub mod routes;
pub mod state;
pub mod util;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use auth::ApiKey;
pub use config::Config;
pub use error::RegistryError;
pub use registry::SessionRegistry;
pub use state::AppState;
