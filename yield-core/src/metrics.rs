//! Per-protocol volume and user metrics kept warm by the background sync

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::YieldResult;

/// Trading volume for a protocol, optionally narrowed to one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeData {
    pub protocol: String,
    /// Pool name, or `None` for protocol-wide volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    pub volume_24h: Decimal,
    pub volume_7d: Decimal,
    pub volume_30d: Decimal,
    /// Share (0.0 - 1.0) of 24h volume held by the largest venue
    pub concentration_risk: f64,
    pub timestamp: DateTime<Utc>,
}

/// User activity for a protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetrics {
    pub protocol: String,
    pub unique_users_24h: u64,
    pub unique_users_7d: u64,
    pub unique_users_30d: u64,
    pub active_wallets: u64,
    pub new_users: u64,
    /// Fraction (0.0 - 1.0) of last period's users that came back
    pub user_retention: f64,
    pub timestamp: DateTime<Utc>,
}

/// Chain-wide totals across every synced protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub chain: String,
    pub total_volume_24h: Decimal,
    pub total_volume_7d: Decimal,
    pub total_volume_30d: Decimal,
    pub total_users_24h: u64,
    pub total_users_7d: u64,
    pub total_users_30d: u64,
    pub protocol_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl AggregatedMetrics {
    /// Sum protocol volumes and user counts into chain totals
    pub fn from_parts(chain: &str, volumes: &[VolumeData], users: &[UserMetrics]) -> Self {
        Self {
            chain: chain.to_string(),
            total_volume_24h: volumes.iter().map(|v| v.volume_24h).sum(),
            total_volume_7d: volumes.iter().map(|v| v.volume_7d).sum(),
            total_volume_30d: volumes.iter().map(|v| v.volume_30d).sum(),
            total_users_24h: users.iter().map(|u| u.unique_users_24h).sum(),
            total_users_7d: users.iter().map(|u| u.unique_users_7d).sum(),
            total_users_30d: users.iter().map(|u| u.unique_users_30d).sum(),
            protocol_count: volumes.len() as u32,
            timestamp: Utc::now(),
        }
    }
}

/// Upstream provider of protocol-level metrics
#[async_trait]
pub trait ProtocolMetricsSource: Send + Sync {
    /// Protocol-wide trading volume
    async fn volume(&self, protocol: &str) -> YieldResult<VolumeData>;

    /// Whether `user_metrics` can return data. Sync skips the user step otherwise.
    fn tracks_users(&self) -> bool {
        false
    }

    /// User activity, or `None` when none is published for `protocol`
    async fn user_metrics(&self, _protocol: &str) -> YieldResult<Option<UserMetrics>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_aggregated_from_parts_sums_protocols() {
        let volume = |protocol: &str, v: Decimal| VolumeData {
            protocol: protocol.to_string(),
            pool: None,
            volume_24h: v,
            volume_7d: v * dec!(7),
            volume_30d: v * dec!(30),
            concentration_risk: 0.5,
            timestamp: Utc::now(),
        };
        let users = UserMetrics {
            protocol: "uniswap-v3".to_string(),
            unique_users_24h: 10,
            unique_users_7d: 50,
            unique_users_30d: 100,
            active_wallets: 10,
            new_users: 2,
            user_retention: 0.4,
            timestamp: Utc::now(),
        };

        let totals = AggregatedMetrics::from_parts(
            "Ethereum",
            &[volume("uniswap-v3", dec!(100)), volume("curve-dex", dec!(50))],
            &[users],
        );

        assert_eq!(totals.total_volume_24h, dec!(150));
        assert_eq!(totals.total_volume_7d, dec!(1050));
        assert_eq!(totals.total_users_30d, 100);
        assert_eq!(totals.protocol_count, 2);
    }
}
