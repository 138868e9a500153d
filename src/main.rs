#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # termhub
//!
//! Terminal session manager for project workspaces.
//!
//! termhub exposes HTTP and WebSocket APIs on port 4317 that let a web
//! frontend create PTY-backed terminal sessions per project, focus a
//! bounded set of them, suspend/resume whole projects with output buffered
//! across the gap, and stream terminal I/O — all protected by a pre-shared
//! API key.
//!
//! ## API surface
//!
//! | Method | Path                           | Auth | Description                     |
//! |--------|--------------------------------|------|---------------------------------|
//! | GET    | `/api/health`                  | No   | Liveness probe                  |
//! | POST   | `/api/sessions`                | Yes  | Create a session                |
//! | GET    | `/api/sessions/{id}`           | Yes  | Session snapshot                |
//! | DELETE | `/api/sessions/{id}`           | Yes  | Close a session                 |
//! | POST   | `/api/sessions/{id}/focus`     | Yes  | Toggle focus                    |
//! | GET    | `/api/projects/{id}/sessions`  | Yes  | List a project's sessions       |
//! | POST   | `/api/projects/{id}/suspend`   | Yes  | Suspend all active sessions     |
//! | POST   | `/api/projects/{id}/resume`    | Yes  | Resume, returning buffered output |
//! | DELETE | `/api/projects/{id}/sessions`  | Yes  | Close all of a project's sessions |
//! | GET    | `/api/ws`                      | Yes* | WebSocket for terminal I/O      |
//!
//! *WebSocket auth is via `?token=<key>` query param (no `Authorization`
//! header available during the upgrade handshake).

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use termhub::proc::PtyFactory;
use termhub::{auth, routes, ws, ApiKey, AppState, Config, SessionRegistry};

/// Terminal session manager for project workspaces.
#[derive(Parser)]
#[command(name = "termhub", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("termhub v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.auth.api_key == "change-me" {
        warn!("Using default API key — set TERMHUB_API_KEY or update config");
    }

    let factory = Arc::new(PtyFactory::new(config.shell.clone()));
    let registry = SessionRegistry::new(config.session.clone(), factory);

    let state = AppState {
        config: Arc::new(config),
        start_time: Instant::now(),
        registry,
    };

    // Build router
    let public_routes = Router::new().route("/api/health", get(routes::health::health));

    let authed_routes = Router::new()
        .route("/api/sessions", post(routes::sessions::create_session))
        .route(
            "/api/sessions/{id}",
            get(routes::sessions::get_session).delete(routes::sessions::delete_session),
        )
        .route(
            "/api/sessions/{id}/focus",
            post(routes::sessions::focus_session),
        )
        .route(
            "/api/projects/{id}/sessions",
            get(routes::projects::list_sessions).delete(routes::projects::cleanup_project),
        )
        .route(
            "/api/projects/{id}/suspend",
            post(routes::projects::suspend_project),
        )
        .route(
            "/api/projects/{id}/resume",
            post(routes::projects::resume_project),
        )
        .layer(middleware::from_fn(auth::require_api_key));

    let ws_route = Router::new().route("/api/ws", get(ws::ws_upgrade));

    let app = Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .merge(ws_route)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        // Browser frontends call the REST surface cross-origin; the API key
        // is the actual access control.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Periodic sweep: reap exited sessions, apply the disconnect grace window
    let registry = state.registry.clone();
    let sweep_interval = state.config.session.sweep_interval_secs;
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            registry.sweep().await;
        }
    });

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // Cleanup
    info!("Shutting down...");
    sweep_task.abort();
    state.registry.shutdown().await;
    info!("Goodbye");
}
