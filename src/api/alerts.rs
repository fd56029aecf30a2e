use crate::alert::{AlertEvent, AlertStore};
use crate::api::admin::validate_admin_token;
use crate::api::{ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

pub fn create_alerts_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/alerts", get(recent_alerts))
        .route("/api/alerts/:id/handled", post(mark_handled))
        .with_state(state)
}

fn store(state: &AppState) -> Result<&Arc<AlertStore>, ApiError> {
    state
        .alert_store
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("alert history is disabled".to_string()))
}

/// GET /api/alerts?limit=N - most recent alerts first
async fn recent_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<AlertEvent>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let alerts = store(&state)?.recent(limit).map_err(|e| {
        error!(error = %e, "Failed to read alert history");
        ApiError::Internal("failed to read alert history".to_string())
    })?;
    Ok(Json(alerts))
}

/// POST /api/alerts/:id/handled - operator acknowledges an alert
async fn mark_handled(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !validate_admin_token(&headers, &state.admin_token) {
        return Err(ApiError::Unauthorized);
    }

    let found = store(&state)?.mark_handled(&id).map_err(|e| {
        error!(alert_id = %id, error = %e, "Failed to update alert");
        ApiError::Internal("failed to update alert".to_string())
    })?;

    if !found {
        return Err(ApiError::NotFound(format!("unknown alert '{}'", id)));
    }
    info!(alert_id = %id, "Alert marked handled");
    Ok(StatusCode::NO_CONTENT)
}
