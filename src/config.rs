//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `TERMHUB_API_KEY`, `TERMHUB_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `termhub.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:4317"
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [session]
//! max_sessions = 64
//! max_focused_per_project = 4
//! suspend_buffer_size = 1000
//! disconnect_grace_secs = 0    # 0 = never auto-close empty rooms
//! sweep_interval_secs = 30
//!
//! [shell]
//! system_shell = "/bin/sh"
//! claude_command = "claude"
//! default_working_dir = "~"
//! rows = 24
//! cols = 80
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:4317`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Session registry limits and lifecycle knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Maximum concurrent sessions across all projects (default 64).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Maximum sessions focused at once within one project (default 4).
    /// Focusing past the cap evicts the least-recently-focused session.
    #[serde(default = "default_max_focused_per_project")]
    pub max_focused_per_project: usize,
    /// Maximum output chunks buffered per session while suspended
    /// (default 1000). Oldest chunks are evicted at capacity.
    #[serde(default = "default_suspend_buffer_size")]
    pub suspend_buffer_size: usize,
    /// Seconds a session's room may stay empty before the sweep closes it
    /// (default 0 = never auto-close).
    #[serde(default)]
    pub disconnect_grace_secs: u64,
    /// Seconds between sweep runs (default 30).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token. Override with `TERMHUB_API_KEY` env var.
    /// Defaults to `"change-me"` which triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Commands and terminal geometry for spawned sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary for `system` sessions (default `/bin/sh`).
    #[serde(default = "default_system_shell")]
    pub system_shell: String,
    /// Command for `claude` sessions (default `claude`).
    #[serde(default = "default_claude_command")]
    pub claude_command: String,
    /// Working directory when a create request omits one (default `~`).
    #[serde(default = "default_working_dir")]
    pub default_working_dir: String,
    /// Initial terminal rows (default 24).
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Initial terminal columns (default 80).
    #[serde(default = "default_cols")]
    pub cols: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:4317".to_string()
}
fn default_max_sessions() -> usize {
    64
}
fn default_max_focused_per_project() -> usize {
    4
}
fn default_suspend_buffer_size() -> usize {
    1000
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_system_shell() -> String {
    "/bin/sh".to_string()
}
fn default_claude_command() -> String {
    "claude".to_string()
}
fn default_working_dir() -> String {
    "~".to_string()
}
fn default_rows() -> u16 {
    24
}
fn default_cols() -> u16 {
    80
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_focused_per_project: default_max_focused_per_project(),
            suspend_buffer_size: default_suspend_buffer_size(),
            disconnect_grace_secs: 0,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            system_shell: default_system_shell(),
            claude_command: default_claude_command(),
            default_working_dir: default_working_dir(),
            rows: default_rows(),
            cols: default_cols(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `termhub.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("termhub.toml").exists() {
            let content =
                std::fs::read_to_string("termhub.toml").expect("Failed to read termhub.toml");
            toml::from_str(&content).expect("Failed to parse termhub.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                auth: AuthConfig::default(),
                session: SessionConfig::default(),
                shell: ShellConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        // Env var overrides
        if let Ok(key) = std::env::var("TERMHUB_API_KEY") {
            config.auth.api_key = key;
        }
        if let Ok(listen) = std::env::var("TERMHUB_LISTEN") {
            config.server.listen = listen;
        }

        config
    }
}
