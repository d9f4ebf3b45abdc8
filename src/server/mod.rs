//! HTTP front end for the engine: JSON API, Server-Sent Events and
//! WebSocket event streams.

pub mod api;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use crate::config::{DEFAULT_HOST, DEFAULT_PORT};
use crate::orchestrator::Engine;

pub use api::{ApiError, AppState, SharedState};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a front end served from another origin.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dev_mode: false,
        }
    }
}

/// Build the full application router: API plus event streams.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/api/sessions/{id}/events", get(sse::session_events))
        .route("/api/sessions/{id}/ws", get(ws::ws_handler))
        .with_state(state)
}

pub async fn start_server(config: ServerConfig, engine: Arc<Engine>) -> Result<()> {
    let state = Arc::new(AppState { engine });
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = config.dev_mode, "server listening");
    println!("journey-forge listening on http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
