use crate::alert::{AlertEvent, AlertKind, Severity};
use crate::api::{ApiError, AppState};
use crate::roster::VehicleRecord;
use crate::route::Waypoint;
use crate::scheduler::TickOutcome;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Manual alert request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseAlertRequest {
    #[serde(default = "default_manual_kind")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub entity_id: String,
    pub message: String,
    #[serde(default)]
    pub location: Option<Waypoint>,
}

fn default_manual_kind() -> AlertKind {
    AlertKind::Manual
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackResponse {
    entity_id: String,
    replaced: bool,
}

/// Admin routes; every one requires the bearer token when one is configured
pub fn create_admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/admin/push-now", post(push_now))
        .route("/api/admin/vehicles", post(track_vehicle))
        .route("/api/admin/vehicles/:id", delete(untrack_vehicle))
        .route("/api/admin/alerts", post(raise_alert))
        .route("/api/admin/connections", get(list_connections))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    req: Request,
    next: Next,
) -> Response {
    if !validate_admin_token(&headers, &state.admin_token) {
        return ApiError::Unauthorized.into_response();
    }
    next.run(req).await
}

/// POST /api/admin/push-now - run one tick immediately
async fn push_now(State(state): State<Arc<AppState>>) -> Result<Json<TickOutcome>, ApiError> {
    info!("Manual push requested");
    state
        .broadcaster
        .tick()
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("a tick is already in progress".to_string()))
}

/// POST /api/admin/vehicles - start simulating a vehicle
async fn track_vehicle(
    State(state): State<Arc<AppState>>,
    Json(vehicle): Json<VehicleRecord>,
) -> Result<Response, ApiError> {
    let replaced = state.broadcaster.track_vehicle(&vehicle)?;
    let status = if replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(TrackResponse {
            entity_id: vehicle.id,
            replaced,
        }),
    )
        .into_response())
}

/// DELETE /api/admin/vehicles/:id
async fn untrack_vehicle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.broadcaster.untrack_vehicle(&id) {
        return Err(ApiError::NotFound(format!("vehicle '{}' is not tracked", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/alerts - raise an alert by hand
async fn raise_alert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RaiseAlertRequest>,
) -> Result<Response, ApiError> {
    if request.entity_id.trim().is_empty() {
        return Err(ApiError::BadRequest("entityId must not be empty".to_string()));
    }

    let alert: AlertEvent = state.dispatcher.raise(
        request.kind,
        request.severity,
        &request.entity_id,
        request.message,
        request.location,
    );

    if let Some(store) = &state.alert_store {
        if let Err(e) = store.insert(&alert) {
            warn!(alert_id = %alert.alert_id, error = %e, "Failed to persist alert");
        }
    }

    Ok((StatusCode::CREATED, Json(alert)).into_response())
}

/// GET /api/admin/connections
async fn list_connections(State(state): State<Arc<AppState>>) -> Response {
    Json(state.broker.connections()).into_response()
}

/// Returns true if the bearer token in `Authorization` matches the expected admin token.
/// Returns true (no restriction) when `expected` is None.
pub(crate) fn validate_admin_token(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        // No admin token configured → unrestricted (dev mode)
        return true;
    };

    let Some(auth_header) = headers.get("Authorization") else {
        return false;
    };
    let Ok(value) = auth_header.to_str() else {
        return false;
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return false;
    };

    token == expected_token
}
