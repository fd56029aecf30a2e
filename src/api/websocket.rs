use crate::api::frames::handle_client_frame;
use crate::api::AppState;
use crate::broker::Broker;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Query parameters for WebSocket upgrade
#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Auth middleware: validates ?token= when an admin token is configured.
///
/// Runs as a tower layer BEFORE WebSocket upgrade extraction so 401 can be
/// returned cleanly without requiring a valid upgrade request in tests.
async fn ws_auth(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsQuery>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.admin_token {
        if params.token.as_deref() != Some(expected.as_str()) {
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }
    next.run(req).await
}

/// GET /api/ws - WebSocket upgrade handler (auth handled by ws_auth middleware)
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create WebSocket router with auth middleware applied
pub fn create_ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), ws_auth))
        .with_state(state)
}

/// Drive one socket: a writer task drains the connection's outbound queue,
/// this task reads client frames until the socket or connection goes away.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let broker = &state.broker;
    let connection_id = broker.connect();
    let Some(queue) = broker.outbound(&connection_id) else {
        return;
    };

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = queue.next().await {
            if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                debug!(connection_id = %connection_id, error = %e, "Socket write failed");
                return;
            }
        }
        // Queue closed and flushed
        let _ = sink.send(Message::Close(None)).await;
    });
    broker.register_writer(connection_id, writer);

    info!(connection_id = %connection_id, "WebSocket connection established");

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_client_frame(broker, &connection_id, &text) {
                    warn!(connection_id = %connection_id, error = %e, "Dropping connection");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "WebSocket client disconnected");
                break;
            }
            Ok(_) => {
                // Ignore binary, ping and pong frames
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    broker.disconnect(&connection_id);
    info!(connection_id = %connection_id, "WebSocket connection closed");
}
