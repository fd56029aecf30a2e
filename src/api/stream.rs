//! Long-poll fallback for clients that cannot hold a WebSocket open.
//!
//! A stream session is an ordinary broker connection without a writer task;
//! its outbound queue is drained by `GET .../poll` instead. Every request
//! counts as activity; a session silent for longer than the idle timeout is
//! reaped by the heartbeat task.

use crate::api::frames::handle_client_frame;
use crate::api::{ApiError, AppState};
use crate::broker::{Broker, ConnectionId};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    connection_id: ConnectionId,
}

pub fn create_stream_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/stream/sessions", post(open_session))
        .route(
            "/api/stream/sessions/:id",
            post(send_frame).delete(close_session),
        )
        .route("/api/stream/sessions/:id/poll", get(poll))
        .with_state(state)
}

fn parse_id(raw: &str) -> Result<ConnectionId, ApiError> {
    raw.parse::<ConnectionId>()
        .map_err(|_| ApiError::NotFound(format!("unknown session '{}'", raw)))
}

/// POST /api/stream/sessions - open a session
async fn open_session(State(state): State<Arc<AppState>>) -> Response {
    let connection_id = state.broker.connect();
    info!(connection_id = %connection_id, "Stream session opened");
    (StatusCode::CREATED, Json(SessionResponse { connection_id })).into_response()
}

/// POST /api/stream/sessions/:id - one client frame as the request body
async fn send_frame(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let connection_id = parse_id(&id)?;
    state.broker.touch_heartbeat(&connection_id)?;
    handle_client_frame(&state.broker, &connection_id, &body)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/stream/sessions/:id/poll - drain queued envelopes as a JSON array
async fn poll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let connection_id = parse_id(&id)?;
    let queue = state
        .broker
        .outbound(&connection_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown session '{}'", id)))?;

    // Polling counts as liveness for sessions that never send heartbeats
    state.broker.touch_heartbeat(&connection_id)?;

    let frames = queue.drain_wait(state.poll_wait).await;

    // Frames are already-encoded envelopes; splice them without re-parsing
    let mut body = String::from("[");
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(frame);
    }
    body.push(']');

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// DELETE /api/stream/sessions/:id
async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let connection_id = parse_id(&id)?;
    if !state.broker.disconnect(&connection_id) {
        return Err(ApiError::NotFound(format!("unknown session '{}'", id)));
    }
    info!(connection_id = %connection_id, "Stream session closed");
    Ok(StatusCode::NO_CONTENT)
}
