//! Yield opportunity data structures

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse risk classification attached to every opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl RiskBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBucket::Low => "low",
            RiskBucket::Medium => "medium",
            RiskBucket::High => "high",
        }
    }
}

impl Default for RiskBucket {
    fn default() -> Self {
        RiskBucket::Medium
    }
}

impl fmt::Display for RiskBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional metadata some sources expose for an opportunity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityMetadata {
    /// Upstream pool id, used to fetch chart data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,

    /// Exposure type (e.g., "single", "multi")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure: Option<String>,

    /// Impermanent-loss label reported by the source ("yes" / "no")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub il_risk: Option<String>,

    /// Whether every token in the pool is a stablecoin
    #[serde(default)]
    pub stablecoin: bool,
}

/// An external yield-bearing position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Stable identifier, `"{protocol}-{pool id}"`
    pub id: String,

    /// Chain the pool lives on (e.g., "Ethereum", "Arbitrum")
    pub chain: String,

    /// Protocol name (e.g., "aave-v3")
    pub protocol: String,

    /// Human-readable pool name (e.g., "USDC-WETH")
    pub pool: String,

    /// Tokens that make up the position
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Annual percentage rate, in percent
    pub apr: f64,

    /// Annual percentage yield, in percent
    pub apy: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub apy_base: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub apy_reward: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reward_tokens: Vec<String>,

    /// Total value locked in USD (never negative)
    pub tvl_usd: Decimal,

    pub risk: RiskBucket,

    /// Which source produced this record
    pub source: String,

    pub last_updated: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OpportunityMetadata>,
}

impl Opportunity {
    /// Composite key used to collapse duplicate listings across sources
    pub fn dedup_key(&self) -> String {
        format!(
            "{}-{}",
            self.protocol.to_lowercase(),
            self.pool.to_lowercase()
        )
    }

    /// Pool id usable for chart lookups, if the source provided one
    pub fn chart_pool_id(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.pool_id.as_deref())
    }

    pub fn is_stablecoin(&self) -> bool {
        self.metadata.as_ref().map(|m| m.stablecoin).unwrap_or(false)
    }
}

/// Convert an APY (percent, daily compounding) into the equivalent APR (percent)
pub fn apy_to_apr(apy: f64) -> f64 {
    if !apy.is_finite() || apy <= -100.0 {
        return 0.0;
    }
    let daily = (1.0 + apy / 100.0).powf(1.0 / 365.0) - 1.0;
    daily * 365.0 * 100.0
}

/// A single historical data point for a pool chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub tvl_usd: Decimal,
    pub apy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apy_base: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apy_reward: Option<f64>,
}
