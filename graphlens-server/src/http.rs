//! GraphLens HTTP status API
//!
//! Small axum server running alongside the Unix socket, for status checks
//! from the CLI and from scripts.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! which can be called directly in tests.
//!
//! Endpoints:
//! - GET /health : liveness plus coordinator reachability
//! - GET /version: server version info
//! - GET /stats  : coordinator counters

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use graphlens_core::LensConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::coordinator::CoordinatorHandle;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub coordinator: CoordinatorHandle,
    pub config: LensConfig,
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Serve until the shutdown broadcast fires.
pub async fn start_http_server(
    coordinator: CoordinatorHandle,
    config: LensConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState {
        coordinator,
        config,
    });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("GraphLens HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(
    coordinator: &CoordinatorHandle,
    socket_path: &str,
) -> (StatusCode, serde_json::Value) {
    match coordinator.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "strategy": stats.strategy,
                "socket": socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "graphlens/1",
    })
}

pub async fn stats_inner(coordinator: &CoordinatorHandle) -> (StatusCode, serde_json::Value) {
    match coordinator.stats().await {
        Ok(stats) => match serde_json::to_value(stats) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "status": "error", "error": e.to_string() }),
            ),
        },
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "status": "error", "error": e.to_string() }),
        ),
    }
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.coordinator, &state.config.service.socket_path).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn stats_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = stats_inner(&state.coordinator).await;
    (status, Json(body))
}
