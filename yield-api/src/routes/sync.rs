//! Background metrics sync endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info};
use yield_services::SyncStats;

use super::error_response;
use crate::AppState;

/// Create sync routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(force_sync))
        .route("/sync/stats", get(sync_stats))
        .route("/metrics", get(aggregated_metrics))
        .route("/metrics/{protocol}", get(protocol_metrics))
}

/// Run a sync cycle now
async fn force_sync(State(state): State<AppState>) -> Json<SyncStats> {
    info!("Forced metrics sync requested");
    Json(state.engine.force_sync().await)
}

async fn sync_stats(State(state): State<AppState>) -> Json<SyncStats> {
    Json(state.engine.sync_stats())
}

/// Cross-protocol totals from the last sync
async fn aggregated_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.get_aggregated_metrics() {
        Ok(Some(metrics)) => (StatusCode::OK, Json(metrics)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no data available"),
        Err(e) => {
            error!("Failed to read aggregated metrics: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Volume and user metrics for one protocol from the last sync
async fn protocol_metrics(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
) -> impl IntoResponse {
    match state.engine.get_protocol_metrics(&protocol) {
        Ok(metrics) if metrics.volume.is_none() && metrics.users.is_none() => {
            error_response(StatusCode::NOT_FOUND, "no data available")
        }
        Ok(metrics) => (StatusCode::OK, Json(metrics)).into_response(),
        Err(e) => {
            error!("Failed to read metrics for {}: {}", protocol, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
