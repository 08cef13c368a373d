//! DefiLlama API response types and normalization into engine types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

use yield_core::{
    apy_to_apr, classify_risk, ChartPoint, Opportunity, OpportunityMetadata, VolumeData,
};

/// Base URL for the DefiLlama yields API
pub const YIELDS_API_BASE: &str = "https://yields.llama.fi";

/// Base URL for the DefiLlama protocol API (volume summaries)
pub const LLAMA_API_BASE: &str = "https://api.llama.fi";

/// Envelope returned by `/pools` and `/chart/{pool}`
#[derive(Debug, Deserialize)]
pub struct LlamaEnvelope<T> {
    pub status: String,
    pub data: T,
}

/// A pool from the `/pools` endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlamaPool {
    pub chain: String,
    pub project: String,
    pub symbol: String,
    /// Upstream pool id (UUID)
    pub pool: String,
    #[serde(default)]
    pub tvl_usd: Option<f64>,
    #[serde(default)]
    pub apy: Option<f64>,
    #[serde(default)]
    pub apy_base: Option<f64>,
    #[serde(default)]
    pub apy_reward: Option<f64>,
    #[serde(default)]
    pub reward_tokens: Option<Vec<String>>,
    #[serde(default)]
    pub stablecoin: Option<bool>,
    #[serde(default)]
    pub il_risk: Option<String>,
    #[serde(default)]
    pub exposure: Option<String>,
    #[serde(default)]
    pub pool_meta: Option<String>,
}

impl LlamaPool {
    /// Total APY, falling back to base + reward when the total is missing
    pub fn total_apy(&self) -> f64 {
        self.apy
            .or_else(|| match (self.apy_base, self.apy_reward) {
                (None, None) => None,
                (base, reward) => Some(base.unwrap_or(0.0) + reward.unwrap_or(0.0)),
            })
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    /// Display name for the pool (symbol plus pool meta when present)
    pub fn display_name(&self) -> String {
        match self.pool_meta.as_deref().map(str::trim) {
            Some(meta) if !meta.is_empty() => format!("{} ({})", self.symbol, meta),
            _ => self.symbol.clone(),
        }
    }

    /// Convert to the engine's opportunity type
    pub fn to_opportunity(&self, source: &str, fetched_at: DateTime<Utc>) -> Opportunity {
        let apy = self.total_apy();
        let apr = apy_to_apr(apy);
        let stablecoin = self.stablecoin.unwrap_or(false);

        let tvl_usd = self
            .tvl_usd
            .and_then(|v| Decimal::try_from(v).ok())
            .unwrap_or_default()
            .max(Decimal::ZERO)
            .round_dp(2);

        let tokens = self
            .symbol
            .split('-')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        Opportunity {
            id: format!("{}-{}", self.project, self.pool),
            chain: self.chain.clone(),
            protocol: self.project.clone(),
            pool: self.display_name(),
            tokens,
            apr,
            apy,
            apy_base: self.apy_base,
            apy_reward: self.apy_reward,
            reward_tokens: self.reward_tokens.clone().unwrap_or_default(),
            tvl_usd,
            risk: classify_risk(apr, stablecoin),
            source: source.to_string(),
            last_updated: fetched_at,
            metadata: Some(OpportunityMetadata {
                pool_id: Some(self.pool.clone()),
                exposure: self.exposure.clone(),
                il_risk: self.il_risk.clone(),
                stablecoin,
            }),
        }
    }
}

/// A point from the `/chart/{pool}` endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlamaChartPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tvl_usd: Option<f64>,
    #[serde(default)]
    pub apy: Option<f64>,
    #[serde(default)]
    pub apy_base: Option<f64>,
    #[serde(default)]
    pub apy_reward: Option<f64>,
}

impl LlamaChartPoint {
    pub fn to_chart_point(&self) -> ChartPoint {
        ChartPoint {
            timestamp: self.timestamp,
            tvl_usd: self
                .tvl_usd
                .and_then(|v| Decimal::try_from(v).ok())
                .unwrap_or_default()
                .max(Decimal::ZERO),
            apy: self.apy.filter(|v| v.is_finite()).unwrap_or(0.0),
            apy_base: self.apy_base,
            apy_reward: self.apy_reward,
        }
    }
}

/// Response from `/summary/dexs/{protocol}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexSummary {
    #[serde(default)]
    pub total24h: Option<f64>,
    #[serde(default)]
    pub total7d: Option<f64>,
    #[serde(default)]
    pub total30d: Option<f64>,
    /// chain -> (protocol -> 24h volume)
    #[serde(default)]
    pub breakdown24h: Option<HashMap<String, HashMap<String, f64>>>,
}

impl DexSummary {
    /// Share of 24h volume on the busiest chain (0.0 when unknown)
    pub fn concentration_risk(&self) -> f64 {
        let Some(breakdown) = &self.breakdown24h else {
            return 0.0;
        };

        let per_chain: Vec<f64> = breakdown
            .values()
            .map(|by_protocol| by_protocol.values().filter(|v| v.is_finite()).sum())
            .collect();
        let total: f64 = per_chain.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }

        per_chain.iter().cloned().fold(0.0, f64::max) / total
    }

    pub fn to_volume_data(&self, protocol: &str) -> VolumeData {
        let to_decimal = |v: Option<f64>| {
            v.and_then(|v| Decimal::try_from(v).ok())
                .unwrap_or_default()
                .max(Decimal::ZERO)
        };

        VolumeData {
            protocol: protocol.to_string(),
            pool: None,
            volume_24h: to_decimal(self.total24h),
            volume_7d: to_decimal(self.total7d),
            volume_30d: to_decimal(self.total30d),
            concentration_risk: self.concentration_risk(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use yield_core::RiskBucket;

    const POOL_JSON: &str = r#"{
        "chain": "Ethereum",
        "project": "aave-v3",
        "symbol": "USDC",
        "tvlUsd": 1250000.5,
        "apyBase": 3.2,
        "apyReward": 0.8,
        "apy": 4.0,
        "rewardTokens": ["0xaave"],
        "pool": "aa70268e-4b52-42bf-a116-608b370f9501",
        "stablecoin": true,
        "ilRisk": "no",
        "exposure": "single",
        "poolMeta": null
    }"#;

    #[test]
    fn test_pool_to_opportunity() {
        let pool: LlamaPool = serde_json::from_str(POOL_JSON).unwrap();
        let opp = pool.to_opportunity("defillama", Utc::now());

        assert_eq!(opp.id, "aave-v3-aa70268e-4b52-42bf-a116-608b370f9501");
        assert_eq!(opp.protocol, "aave-v3");
        assert_eq!(opp.pool, "USDC");
        assert_eq!(opp.tvl_usd, dec!(1250000.5));
        assert_eq!(opp.apy, 4.0);
        assert!(opp.apr < 4.0);
        assert_eq!(opp.risk, RiskBucket::Low);
        assert_eq!(
            opp.chart_pool_id(),
            Some("aa70268e-4b52-42bf-a116-608b370f9501")
        );
        assert!(opp.is_stablecoin());
    }

    #[test]
    fn test_negative_tvl_clamps_to_zero() {
        let mut pool: LlamaPool = serde_json::from_str(POOL_JSON).unwrap();
        pool.tvl_usd = Some(-5.0);
        let opp = pool.to_opportunity("defillama", Utc::now());
        assert_eq!(opp.tvl_usd, Decimal::ZERO);
    }

    #[test]
    fn test_total_apy_falls_back_to_components() {
        let mut pool: LlamaPool = serde_json::from_str(POOL_JSON).unwrap();
        pool.apy = None;
        assert!((pool.total_apy() - 4.0).abs() < 1e-9);

        pool.apy_base = None;
        pool.apy_reward = None;
        assert_eq!(pool.total_apy(), 0.0);
    }

    #[test]
    fn test_display_name_includes_pool_meta() {
        let mut pool: LlamaPool = serde_json::from_str(POOL_JSON).unwrap();
        pool.symbol = "WETH-USDC".to_string();
        pool.pool_meta = Some("0.05%".to_string());

        let opp = pool.to_opportunity("defillama", Utc::now());
        assert_eq!(opp.pool, "WETH-USDC (0.05%)");
        assert_eq!(opp.tokens, vec!["WETH".to_string(), "USDC".to_string()]);
    }

    #[test]
    fn test_dex_summary_concentration() {
        let summary: DexSummary = serde_json::from_str(
            r#"{
                "total24h": 1000.0,
                "total7d": 7000.0,
                "total30d": 30000.0,
                "breakdown24h": {
                    "ethereum": {"uniswap": 750.0},
                    "arbitrum": {"uniswap": 250.0}
                }
            }"#,
        )
        .unwrap();

        assert!((summary.concentration_risk() - 0.75).abs() < 1e-9);

        let volume = summary.to_volume_data("uniswap");
        assert_eq!(volume.volume_24h, dec!(1000));
        assert_eq!(volume.volume_30d, dec!(30000));
        assert!(volume.pool.is_none());
    }
}
