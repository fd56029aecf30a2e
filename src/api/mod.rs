// HTTP and WebSocket APIs

pub mod admin;
pub mod alerts;
mod error;
pub mod frames;
pub mod stream;
pub mod websocket;

pub use admin::create_admin_router;
pub use alerts::create_alerts_router;
pub use error::ApiError;
pub use stream::create_stream_router;
pub use websocket::{create_ws_router, ws_handler};

use crate::alert::{AlertDispatcher, AlertStore};
use crate::broker::InMemoryBroker;
use crate::scheduler::PositionBroadcaster;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state
pub struct AppState {
    pub broker: Arc<InMemoryBroker>,
    pub broadcaster: Arc<PositionBroadcaster>,
    pub dispatcher: Arc<AlertDispatcher>,
    /// Alert history; `None` disables the history routes
    pub alert_store: Option<Arc<AlertStore>>,
    /// Bearer token for admin routes and `?token=` for WebSocket upgrades
    pub admin_token: Option<String>,
    pub poll_wait: Duration,
}

/// Every route the server exposes, with permissive CORS for dashboards
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(create_ws_router(state.clone()))
        .merge(create_stream_router(state.clone()))
        .merge(create_admin_router(state.clone()))
        .merge(create_alerts_router(state))
        .layer(cors)
}
