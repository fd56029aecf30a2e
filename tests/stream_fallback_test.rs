// Integration tests for the long-poll fallback transport

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fleetwatch::{
    alert::AlertDispatcher,
    api::{create_router, AppState},
    broker::{BrokerConfig, InMemoryBroker},
    motion::MotionStore,
    route::RouteTable,
    roster::{FleetRoster, StaticRoster},
    scheduler::PositionBroadcaster,
    simulator::{PositionSimulator, SimulationConfig},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn create_test_app() -> (Router, Arc<PositionBroadcaster>) {
    let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
    let roster = StaticRoster::demo();
    let vehicles = roster.vehicles();
    let table = RouteTable::from_definitions(
        vehicles.iter().map(|v| (v.id.clone(), v.route.clone())),
    );
    let broadcaster = Arc::new(PositionBroadcaster::new(
        Arc::new(MotionStore::seed(&table, &vehicles, &SimulationConfig::default())),
        PositionSimulator::with_random(SimulationConfig::default()),
        broker.clone(),
        None,
    ));

    let router = create_router(AppState {
        broker: Arc::clone(&broker),
        broadcaster: Arc::clone(&broadcaster),
        dispatcher: Arc::new(AlertDispatcher::new(broker.clone())),
        alert_store: None,
        admin_token: None,
        poll_wait: Duration::from_millis(20),
    });
    (router, broadcaster)
}

fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn open_session(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(request("POST", "/api/stream/sessions", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["connectionId"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn poll(router: &Router, id: &str) -> Vec<Value> {
    let response = router
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/stream/sessions/{}/poll", id),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await.as_array().unwrap().clone()
}

/// Subscribe over the fallback, push a tick, poll the ack then the batch.
#[tokio::test]
async fn test_subscribe_and_poll_positions() {
    let (router, broadcaster) = create_test_app();
    let id = open_session(&router).await;

    let response = router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/stream/sessions/{}", id),
            r#"{"type":"subscribe","topic":"positions"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    broadcaster.tick().unwrap();

    let frames = poll(&router, &id).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "System");
    assert_eq!(frames[0]["data"]["action"], "subscribed");
    assert_eq!(frames[1]["type"], "PositionBatch");
    assert_eq!(frames[1]["data"].as_array().unwrap().len(), 3);
}

/// An idle poll returns an empty array once the wait expires.
#[tokio::test]
async fn test_idle_poll_returns_empty() {
    let (router, _) = create_test_app();
    let id = open_session(&router).await;

    assert!(poll(&router, &id).await.is_empty());
}

#[tokio::test]
async fn test_closed_session_is_gone() {
    let (router, _) = create_test_app();
    let id = open_session(&router).await;
    let uri = format!("/api/stream/sessions/{}", id);

    let response = router
        .clone()
        .oneshot(request("DELETE", &uri, ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .clone()
        .oneshot(request("DELETE", &uri, ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(request("GET", &format!("{}/poll", uri), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_session_id_is_404() {
    let (router, _) = create_test_app();

    let response = router
        .oneshot(request("GET", "/api/stream/sessions/not-a-uuid/poll", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
