//! Protocol-scoped source adapters backed by the DefiLlama pool list

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use yield_core::{
    retry_with_backoff, Opportunity, ProtocolInfo, SourceAdapter, YieldError, YieldResult,
};

use crate::client::{LlamaYieldsClient, DEFAULT_RATE_LIMIT};

/// Data-source label stamped on every opportunity from this adapter
pub const SOURCE_NAME: &str = "defillama";

/// Adapter exposing one protocol's pools (optionally narrowed to one chain)
pub struct LlamaProtocolAdapter {
    client: Arc<LlamaYieldsClient>,
    project: String,
    chain: Option<String>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl LlamaProtocolAdapter {
    /// Create an adapter for a DefiLlama project slug (e.g., "aave-v3")
    pub fn new(client: Arc<LlamaYieldsClient>, project: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
            chain: None,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Restrict the adapter to a single chain (case-insensitive)
    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    fn matches_chain(&self, chain: &str) -> bool {
        self.chain
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(chain))
            .unwrap_or(true)
    }
}

#[async_trait]
impl SourceAdapter for LlamaProtocolAdapter {
    #[instrument(skip(self), fields(project = %self.project))]
    async fn list(&self) -> YieldResult<Vec<Opportunity>> {
        let pools = retry_with_backoff(self.retry_attempts, self.retry_delay, || {
            self.client.pools()
        })
        .await
        .map_err(|e| match e {
            YieldError::Parse { .. } | YieldError::Timeout(_) => e,
            other => YieldError::source(&self.project, other.to_string()),
        })?;

        let fetched_at = Utc::now();
        let opportunities: Vec<Opportunity> = pools
            .iter()
            .filter(|p| p.project == self.project && self.matches_chain(&p.chain))
            .map(|p| p.to_opportunity(SOURCE_NAME, fetched_at))
            .collect();

        debug!(
            "{} pools matched project {}",
            opportunities.len(),
            self.project
        );
        Ok(opportunities)
    }

    fn protocol_info(&self) -> ProtocolInfo {
        ProtocolInfo {
            name: self.project.clone(),
            chain: self.chain.clone().unwrap_or_else(|| "all".to_string()),
            base_url: self.client.yields_url().to_string(),
            rate_limit: DEFAULT_RATE_LIMIT,
            timeout_ms: self.client.timeout().as_millis() as u64,
            retry_attempts: self.retry_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_info_reflects_scope() {
        let client = Arc::new(LlamaYieldsClient::new().unwrap());
        let adapter = LlamaProtocolAdapter::new(Arc::clone(&client), "aave-v3")
            .with_chain("Arbitrum")
            .with_retry(5, Duration::from_millis(500));

        let info = adapter.protocol_info();
        assert_eq!(info.name, "aave-v3");
        assert_eq!(info.chain, "Arbitrum");
        assert_eq!(info.retry_attempts, 5);
        assert_eq!(info.base_url, "https://yields.llama.fi");

        assert!(adapter.matches_chain("arbitrum"));
        assert!(!adapter.matches_chain("Ethereum"));
        assert!(LlamaProtocolAdapter::new(client, "curve-dex").matches_chain("Ethereum"));
    }
}
