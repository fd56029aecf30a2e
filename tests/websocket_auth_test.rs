// Integration tests for WebSocket auth enforcement
//
// Auth is enforced as a tower middleware (ws_auth) that runs BEFORE WebSocket
// upgrade extraction. This allows 401 to be returned cleanly without a full
// WebSocket handshake.
//
// Note: Tests use tower::ServiceExt::oneshot. When auth passes, requests reach
// the WebSocketUpgrade extractor, which returns 426 (no hyper OnUpgrade extension
// in test requests). The tests verify the auth decision (401 vs non-401), not
// the WebSocket upgrade itself.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fleetwatch::{
    alert::AlertDispatcher,
    api::{create_ws_router, AppState},
    broker::{BrokerConfig, InMemoryBroker},
    motion::MotionStore,
    scheduler::PositionBroadcaster,
    simulator::{PositionSimulator, SimulationConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn make_router(admin_token: Option<&str>) -> Router {
    let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
    let state = Arc::new(AppState {
        broadcaster: Arc::new(PositionBroadcaster::new(
            Arc::new(MotionStore::new()),
            PositionSimulator::with_random(SimulationConfig::default()),
            broker.clone(),
            None,
        )),
        dispatcher: Arc::new(AlertDispatcher::new(broker.clone())),
        broker,
        alert_store: None,
        admin_token: admin_token.map(|t| t.to_string()),
        poll_wait: Duration::from_millis(10),
    });
    create_ws_router(state)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// ── no token configured: all requests pass through ───────────────────────────

#[tokio::test]
async fn test_auth_disabled_no_token_allowed() {
    let app = make_router(None);
    let resp = app.oneshot(get_request("/api/ws")).await.unwrap();
    // Middleware passes; WebSocket extractor fails with 426 (test artifact, not 401)
    assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ── token configured, missing token → 401 ────────────────────────────────────

#[tokio::test]
async fn test_auth_enabled_no_token_returns_401() {
    let app = make_router(Some("secret"));
    let resp = app.oneshot(get_request("/api/ws")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ── token configured, wrong token → 401 ──────────────────────────────────────

#[tokio::test]
async fn test_auth_enabled_invalid_token_returns_401() {
    let app = make_router(Some("secret"));
    let resp = app
        .oneshot(get_request("/api/ws?token=not-the-secret"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ── token configured, matching token → auth passes ───────────────────────────

#[tokio::test]
async fn test_auth_enabled_valid_token_not_rejected() {
    let app = make_router(Some("secret"));
    let resp = app
        .oneshot(get_request("/api/ws?token=secret"))
        .await
        .unwrap();
    // Middleware passes (auth ok); WebSocket extractor returns 426 (test artifact)
    assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
}
