//! HTTP status API through full axum dispatch (`oneshot`).

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use graphlens_core::LensConfig;
use graphlens_server::http::{build_router, HttpState};
use graphlens_server::subsystems::coordinator::spawn_coordinator;
use tokio::sync::broadcast;
use tower::ServiceExt;

fn state(shutdown: &broadcast::Sender<()>) -> Arc<HttpState> {
    let config = LensConfig::default();
    let (coordinator, _task) = spawn_coordinator(&config, shutdown.subscribe());
    Arc::new(HttpState {
        coordinator,
        config,
    })
}

async fn get_json(state: Arc<HttpState>, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = build_router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ===========================================================================
// TEST 1: GET /health: 200 with strategy and socket path
// ===========================================================================
#[tokio::test]
async fn test_health_endpoint() {
    let (shutdown, _) = broadcast::channel(1);
    let (status, body) = get_json(state(&shutdown), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["socket"], "/tmp/graphlens.sock");
}

// ===========================================================================
// TEST 2: GET /version
// ===========================================================================
#[tokio::test]
async fn test_version_endpoint() {
    let (shutdown, _) = broadcast::channel(1);
    let (status, body) = get_json(state(&shutdown), "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

// ===========================================================================
// TEST 3: GET /stats: coordinator counters
// ===========================================================================
#[tokio::test]
async fn test_stats_endpoint() {
    let (shutdown, _) = broadcast::channel(1);
    let (status, body) = get_json(state(&shutdown), "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "relay");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["in_flight"], 0);
}

// ===========================================================================
// TEST 4: unknown route: 404
// ===========================================================================
#[tokio::test]
async fn test_unknown_route() {
    let (shutdown, _) = broadcast::channel(1);
    let response = build_router(state(&shutdown))
        .oneshot(Request::builder().uri("/search").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
