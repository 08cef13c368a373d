//! Source adapter capability contract
//!
//! Every external protocol source implements [`SourceAdapter`]. The free
//! functions in this module are the shared base behaviour adapters build on:
//! exponential-backoff retry around any fetch and the risk-bucket heuristic.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{YieldError, YieldResult};
use crate::opportunity::{ChartPoint, Opportunity, RiskBucket};
use crate::protocol::ProtocolInfo;

/// Smart-contract audit information for a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub audited: bool,
    #[serde(default)]
    pub auditors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_audit: Option<String>,
}

/// Community/social signals for a protocol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialMetrics {
    pub twitter_followers: u64,
    pub discord_members: u64,
    pub github_commits_30d: u64,
}

/// Capability interface implemented per external protocol
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch every opportunity this source knows about.
    ///
    /// Must fail on upstream failure rather than return partial data.
    async fn list(&self) -> YieldResult<Vec<Opportunity>>;

    /// Fetch a single opportunity by id.
    ///
    /// The default looks the id up in [`SourceAdapter::list`].
    async fn detail(&self, id: &str) -> YieldResult<Opportunity> {
        self.list()
            .await?
            .into_iter()
            .find(|o| o.id == id)
            .ok_or_else(|| YieldError::not_found(format!("Opportunity {} not found", id)))
    }

    /// Static description of the upstream
    fn protocol_info(&self) -> ProtocolInfo;

    /// Audit details for a pool. Not implemented by any source yet: returns `None`.
    async fn audit_info(&self, _id: &str) -> Option<AuditInfo> {
        None
    }

    /// Social metrics for the protocol. Not implemented by any source yet: returns `None`.
    async fn social_metrics(&self) -> Option<SocialMetrics> {
        None
    }

    /// Pools comparable to the given one. Not implemented by any source yet: returns `None`.
    async fn comparable_pools(&self, _id: &str) -> Option<Vec<Opportunity>> {
        None
    }
}

/// Source of historical pool data for charts
#[async_trait]
pub trait ChartProvider: Send + Sync {
    async fn chart(&self, pool_id: &str) -> YieldResult<Vec<ChartPoint>>;
}

/// Run `op` up to `attempts` times, doubling the delay after each failure.
///
/// Attempt `i` (0-based) that fails waits `base_delay * 2^i` before the next
/// attempt. Non-retryable errors are returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> YieldResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = YieldResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    warn!("Giving up after {} attempts: {}", attempts, e);
                    return Err(e);
                }

                let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                debug!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Deterministic risk bucket from APR (percent) with a stablecoin carve-out
pub fn classify_risk(apr: f64, stablecoin: bool) -> RiskBucket {
    if stablecoin && apr < 10.0 {
        return RiskBucket::Low;
    }
    if apr < 15.0 {
        RiskBucket::Low
    } else if apr < 30.0 {
        RiskBucket::Medium
    } else {
        RiskBucket::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_retry_attempts_exactly_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: YieldResult<()> = retry_with_backoff(3, Duration::from_secs(1), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(YieldError::network("connection refused"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_doubles_delay() {
        let start = tokio::time::Instant::now();

        let _: YieldResult<()> = retry_with_backoff(3, Duration::from_secs(1), || async {
            Err(YieldError::network("down"))
        })
        .await;

        // 1s after the first failure, 2s after the second, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: YieldResult<()> = retry_with_backoff(5, Duration::from_millis(10), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(YieldError::parse("unexpected shape", "[]"))
            }
        })
        .await;

        assert!(matches!(result, Err(YieldError::Parse { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(3, Duration::from_millis(10), || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(YieldError::network("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_classify_risk() {
        assert_eq!(classify_risk(8.0, true), RiskBucket::Low);
        assert_eq!(classify_risk(12.0, true), RiskBucket::Low);
        assert_eq!(classify_risk(14.9, false), RiskBucket::Low);
        assert_eq!(classify_risk(15.0, false), RiskBucket::Medium);
        assert_eq!(classify_risk(29.9, true), RiskBucket::Medium);
        assert_eq!(classify_risk(30.0, false), RiskBucket::High);
    }
}
