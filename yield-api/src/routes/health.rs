//! Health check endpoints

use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use tracing::warn;
use yield_adapters::RateLimiterStats;
use yield_services::{CacheStats, HealthStatus, SystemHealth};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    sources: SystemHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<CacheStats>,
    rate_limiter: RateLimiterStats,
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let sources = state.engine.get_system_health();
    let cache = match state.engine.cache_stats() {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Failed to read cache stats: {}", e);
            None
        }
    };

    let code = if sources.status == HealthStatus::Down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let response = HealthResponse {
        status: sources.status,
        sources,
        cache,
        rate_limiter: state.llama.limiter_stats().await,
    };

    (code, Json(response))
}

/// Calls every source once and reports which returned data
async fn source_check(State(state): State<AppState>) -> Json<HashMap<String, bool>> {
    Json(state.engine.aggregation().health_check().await)
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/sources", get(source_check))
}
