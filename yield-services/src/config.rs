//! Engine configuration
//!
//! Every section is serde (de)serializable with defaults, so a partial JSON
//! document or a handful of environment variables is enough to run.

use std::env;

use serde::{Deserialize, Serialize};

use crate::cache_store::CacheConfig;
use crate::reliability::{AggregationMethod, ReliabilityConfig};
use crate::risk::{RiskMonitorConfig, RiskThreshold};
use crate::sync_scheduler::SyncConfig;

/// Which upstream protocols the engine lists opportunities for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// DefiLlama project slugs, one source adapter each
    pub protocols: Vec<String>,
    /// Restrict every adapter to one chain
    pub chain: Option<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            protocols: ["aave-v3", "compound-v3", "uniswap-v3", "curve-dex", "lido"]
                .into_iter()
                .map(String::from)
                .collect(),
            chain: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: String,
    pub sources: SourcesConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub reliability: ReliabilityConfig,
    pub risk: RiskMonitorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "data/yield-cache.db".to_string(),
            sources: SourcesConfig::default(),
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            reliability: ReliabilityConfig::default(),
            risk: RiskMonitorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables over the defaults
    ///
    /// Recognized:
    /// - CACHE_DB_PATH: SQLite cache file
    /// - YIELD_PROTOCOLS / YIELD_CHAIN: comma-separated source protocols, chain filter
    /// - SYNC_ENABLED, SYNC_INTERVAL_MS, SYNC_PROTOCOLS, SYNC_CHAIN
    /// - AGGREGATION_METHOD: primary-fallback | fastest | consensus
    /// - RISK_THRESHOLDS: JSON array of thresholds
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("CACHE_DB_PATH") {
            config.db_path = path;
        }

        if let Some(protocols) = get("YIELD_PROTOCOLS") {
            config.sources.protocols = split_list(&protocols);
        }
        if let Some(chain) = get("YIELD_CHAIN") {
            config.sources.chain = Some(chain);
        }

        if let Some(enabled) = get("SYNC_ENABLED") {
            config.sync.enabled = parse_bool("SYNC_ENABLED", &enabled)?;
        }
        if let Some(interval) = get("SYNC_INTERVAL_MS") {
            config.sync.interval_ms = interval.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "SYNC_INTERVAL_MS".to_string(),
                value: interval.clone(),
            })?;
        }
        if let Some(protocols) = get("SYNC_PROTOCOLS") {
            config.sync.protocols = split_list(&protocols);
        }
        if let Some(chain) = get("SYNC_CHAIN") {
            config.sync.chain = chain;
        }

        if let Some(method) = get("AGGREGATION_METHOD") {
            config.reliability.aggregation_method =
                method.parse::<AggregationMethod>().map_err(|_| ConfigError::InvalidValue {
                    field: "AGGREGATION_METHOD".to_string(),
                    value: method.clone(),
                })?;
        }

        if let Some(json) = get("RISK_THRESHOLDS") {
            config.risk.thresholds = serde_json::from_str::<Vec<RiskThreshold>>(&json).map_err(
                |e| ConfigError::InvalidJson {
                    field: "RISK_THRESHOLDS".to_string(),
                    error: e.to_string(),
                },
            )?;
        }

        Ok(config)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid JSON in {field}: {error}")]
    InvalidJson { field: String, error: String },
}
