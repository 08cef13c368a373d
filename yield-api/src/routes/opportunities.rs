//! Opportunity-related API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use yield_core::{Opportunity, RiskBucket};
use yield_services::{AdapterStats, EngineError};

use super::error_response;
use crate::AppState;

/// Query parameters for listing opportunities
#[derive(Debug, Default, Deserialize)]
pub struct ListOpportunitiesQuery {
    /// Filter by chain (case-insensitive)
    pub chain: Option<String>,
    /// Filter by protocol (case-insensitive)
    pub protocol: Option<String>,
    /// Filter by risk bucket
    pub risk: Option<RiskBucket>,
    /// Minimum APY in percent
    pub min_apy: Option<f64>,
    /// Minimum TVL in USD
    pub min_tvl: Option<Decimal>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

/// Response for listing opportunities
#[derive(Debug, Serialize)]
pub struct OpportunitiesResponse {
    pub opportunities: Vec<Opportunity>,
    pub count: usize,
}

/// Create opportunity routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/opportunities", get(list_opportunities))
        .route("/opportunities/{id}", get(get_opportunity))
        .route("/charts/{pool_id}", get(get_chart))
        .route("/stats", get(get_stats))
        .route("/strategy", get(fetch_with_strategy))
        .route("/refresh", post(refresh_all))
}

/// Keep the opportunities matching every filter, preserving order
fn apply_filters(opportunities: Vec<Opportunity>, params: &ListOpportunitiesQuery) -> Vec<Opportunity> {
    let filtered = opportunities.into_iter().filter(|o| {
        params
            .chain
            .as_deref()
            .map_or(true, |c| o.chain.eq_ignore_ascii_case(c))
            && params
                .protocol
                .as_deref()
                .map_or(true, |p| o.protocol.eq_ignore_ascii_case(p))
            && params.risk.map_or(true, |r| o.risk == r)
            && params.min_apy.map_or(true, |min| o.apy >= min)
            && params.min_tvl.map_or(true, |min| o.tvl_usd >= min)
    });

    match params.limit {
        Some(limit) => filtered.take(limit).collect(),
        None => filtered.collect(),
    }
}

/// List opportunities with optional filtering
async fn list_opportunities(
    State(state): State<AppState>,
    Query(params): Query<ListOpportunitiesQuery>,
) -> Json<OpportunitiesResponse> {
    info!("Listing opportunities with params: {:?}", params);

    let opportunities = apply_filters(state.engine.list_opportunities().await, &params);
    let count = opportunities.len();
    Json(OpportunitiesResponse {
        opportunities,
        count,
    })
}

/// Single opportunity with risk assessment and source extras
async fn get_opportunity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.get_opportunity_detail(&id).await {
        Ok(Some(detail)) => (StatusCode::OK, Json(detail)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Opportunity not found: {}", id)),
        Err(EngineError::Aggregation(e)) => {
            warn!("{}", e);
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Err(e) => {
            error!("Failed to fetch opportunity {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Historical TVL/APY series for a pool
async fn get_chart(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.get_chart_data(&pool_id).await {
        Ok(points) => (StatusCode::OK, Json(points)).into_response(),
        Err(EngineError::NoChartProvider) => {
            error_response(StatusCode::NOT_IMPLEMENTED, "Charts are not available")
        }
        Err(e) => {
            error!("Failed to fetch chart for {}: {}", pool_id, e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn get_stats(State(state): State<AppState>) -> Json<AdapterStats> {
    Json(state.engine.get_adapter_stats().await)
}

/// Fetch through the configured multi-source strategy
async fn fetch_with_strategy(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.fetch_with_strategy().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) if e.is_unavailable() => {
            warn!("Strategy fetch unavailable: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "no data available")
        }
        Err(e) => {
            error!("Strategy fetch failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// Drop cached results and refetch every source
async fn refresh_all(State(state): State<AppState>) -> Json<OpportunitiesResponse> {
    let refreshed = state.engine.refresh_all().await;
    info!("Refreshed {} sources", refreshed.len());

    let opportunities = state.engine.list_opportunities().await;
    let count = opportunities.len();
    Json(OpportunitiesResponse {
        opportunities,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn opportunity(chain: &str, protocol: &str, apy: f64, tvl: Decimal, risk: RiskBucket) -> Opportunity {
        Opportunity {
            id: format!("{}-{}", protocol, chain),
            chain: chain.to_string(),
            protocol: protocol.to_string(),
            pool: "USDC".to_string(),
            tokens: vec!["USDC".to_string()],
            apr: apy,
            apy,
            apy_base: None,
            apy_reward: None,
            reward_tokens: vec![],
            tvl_usd: tvl,
            risk,
            source: "defillama".to_string(),
            last_updated: Utc::now(),
            metadata: None,
        }
    }

    fn sample() -> Vec<Opportunity> {
        vec![
            opportunity("Ethereum", "aave-v3", 4.0, dec!(1000000), RiskBucket::Low),
            opportunity("Arbitrum", "aave-v3", 6.0, dec!(50000), RiskBucket::Low),
            opportunity("Ethereum", "curve-dex", 18.0, dec!(200000), RiskBucket::Medium),
        ]
    }

    #[test]
    fn test_no_filters_keeps_everything() {
        let result = apply_filters(sample(), &ListOpportunitiesQuery::default());
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_filters_combine() {
        let params = ListOpportunitiesQuery {
            chain: Some("ethereum".to_string()),
            min_apy: Some(5.0),
            ..Default::default()
        };
        let result = apply_filters(sample(), &params);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].protocol, "curve-dex");
    }

    #[test]
    fn test_tvl_risk_and_limit() {
        let params = ListOpportunitiesQuery {
            risk: Some(RiskBucket::Low),
            min_tvl: Some(dec!(10000)),
            limit: Some(1),
            ..Default::default()
        };
        let result = apply_filters(sample(), &params);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chain, "Ethereum");
    }
}
