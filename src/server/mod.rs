//! HTTP / WebSocket surface for the fall monitor.
//!
//! - `GET /ws` - one scoring session per socket; results and alerts go out
//!   on the same socket
//! - `GET /health` - liveness plus session and incident counts
//! - `GET /incidents?limit=N` - incident log snapshot, oldest first
//! - `GET /config` - active detection settings

mod routes;
mod ws;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::monitor::FallMonitor;

pub use ws::{parse_frame, ErrorMessage, FrameDecodeError, Outbound};

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<FallMonitor>,
}

/// Build the router with CORS for the configured origins
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(routes::health))
        .route("/incidents", get(routes::incidents))
        .route("/config", get(routes::config))
        .with_state(state)
        .layer(cors_layer(cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Bind and serve until Ctrl+C
pub async fn serve(config: &ServerConfig, monitor: Arc<FallMonitor>) -> Result<()> {
    let state = AppState { monitor };
    let app = router(state, &config.cors_origins);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", addr))?;

    info!(event = "server_start", addr = %addr, "Fall monitor listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down...");
}
