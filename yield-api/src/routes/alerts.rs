//! Risk alert endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use yield_services::{PortfolioRisk, RiskAlert};

use super::error_response;
use crate::AppState;

/// Query parameters for listing alerts
#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    /// Include acknowledged alerts
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<RiskAlert>,
    pub count: usize,
}

/// Create alert routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/risk", get(portfolio_risk))
        .route("/risk/evaluate", post(evaluate_risk))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertsQuery>,
) -> Json<AlertsResponse> {
    let alerts = if params.all {
        state.engine.monitor().all_alerts()
    } else {
        state.engine.get_active_alerts()
    };
    let count = alerts.len();
    Json(AlertsResponse { alerts, count })
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.engine.acknowledge_alert(&id) {
        info!("Alert {} acknowledged", id);
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("Alert not found: {}", id))
    }
}

/// TVL-weighted risk across every listed opportunity
async fn portfolio_risk(State(state): State<AppState>) -> Json<PortfolioRisk> {
    Json(state.engine.portfolio_risk().await)
}

/// Run a risk evaluation now
async fn evaluate_risk(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.evaluate_risk().await {
        Some(alerts) => {
            let count = alerts.len();
            (StatusCode::OK, Json(AlertsResponse { alerts, count })).into_response()
        }
        None => error_response(StatusCode::CONFLICT, "Risk evaluation already in progress"),
    }
}
