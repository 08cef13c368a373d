//! DefiLlama API client
//!
//! Provides methods for the DefiLlama yields API (pool listings and pool
//! charts) and the protocol API (DEX volume summaries).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use yield_core::{ChartPoint, ChartProvider, YieldError, YieldResult};

use crate::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::types::{
    DexSummary, LlamaChartPoint, LlamaEnvelope, LlamaPool, LLAMA_API_BASE, YIELDS_API_BASE,
};

/// Default per-request timeout, below the engine's per-attempt timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 8_000;

/// Requests per minute the public DefiLlama endpoints tolerate
pub const DEFAULT_RATE_LIMIT: u32 = 300;

/// How long a downloaded pool list is shared between adapters
const POOLS_SNAPSHOT_TTL: Duration = Duration::from_secs(60);

/// Oldest snapshot still served when a refresh fails
const MAX_STALE_SNAPSHOT: Duration = Duration::from_secs(10 * 60);

/// Pool list downloaded once and shared by every protocol adapter
#[derive(Debug)]
struct PoolsSnapshot {
    fetched_at: Instant,
    pools: Arc<Vec<LlamaPool>>,
}

/// Rate-limited HTTP access, cloned into detached download tasks
#[derive(Debug, Clone)]
struct HttpFetcher {
    client: Client,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl HttpFetcher {
    /// GET a URL and decode the JSON body, keeping the payload on shape errors
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> YieldResult<T> {
        self.limiter.acquire().await;
        debug!("Fetching DefiLlama resource: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    YieldError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    YieldError::network(format!("Failed to fetch {}: {}", url, e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| YieldError::network(format!("Failed to read body from {}: {}", url, e)))?;

        if !status.is_success() {
            return Err(YieldError::api(format!(
                "DefiLlama API error ({}): {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| YieldError::parse(format!("Unexpected response from {}: {}", url, e), &body))
    }

    async fn download_pools(&self, url: &str) -> YieldResult<Arc<Vec<LlamaPool>>> {
        let envelope: LlamaEnvelope<Vec<LlamaPool>> = self.get_json(url).await?;

        if envelope.status != "success" {
            return Err(YieldError::api(format!(
                "DefiLlama pools returned status {}",
                envelope.status
            )));
        }

        info!("Fetched {} DefiLlama pools", envelope.data.len());
        Ok(Arc::new(envelope.data))
    }
}

/// DefiLlama API client
#[derive(Debug)]
pub struct LlamaYieldsClient {
    http: HttpFetcher,
    yields_url: String,
    api_url: String,
    snapshot_ttl: Duration,
    pools: Arc<RwLock<Option<PoolsSnapshot>>>,
    /// Held by the task downloading a fresh pool list
    refresh: Arc<Mutex<()>>,
}

impl LlamaYieldsClient {
    /// Create a client against the public DefiLlama endpoints
    pub fn new() -> YieldResult<Self> {
        Self::with_base_urls(YIELDS_API_BASE, LLAMA_API_BASE)
    }

    /// Create a client against custom base URLs (mirrors, test servers)
    pub fn with_base_urls(yields_url: &str, api_url: &str) -> YieldResult<Self> {
        let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("YieldEngine/1.0")
            .build()
            .map_err(|e| YieldError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http: HttpFetcher {
                client,
                timeout,
                limiter: Arc::new(RateLimiter::per_minute(DEFAULT_RATE_LIMIT, "defillama")),
            },
            yields_url: yields_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            snapshot_ttl: POOLS_SNAPSHOT_TTL,
            pools: Arc::new(RwLock::new(None)),
            refresh: Arc::new(Mutex::new(())),
        })
    }

    /// Override how long a downloaded pool list is reused
    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    pub fn yields_url(&self) -> &str {
        &self.yields_url
    }

    pub fn timeout(&self) -> Duration {
        self.http.timeout
    }

    /// Usage of the limiter shared by every DefiLlama request
    pub async fn limiter_stats(&self) -> RateLimiterStats {
        self.http.limiter.stats().await
    }

    /// All pools tracked by DefiLlama, shared across callers for a short window.
    ///
    /// One detached task downloads at a time, so a caller that times out does
    /// not abort it. While it runs, other callers get the previous snapshot if
    /// there is one. A failed download falls back to a snapshot younger than
    /// `MAX_STALE_SNAPSHOT`.
    #[instrument(skip(self))]
    pub async fn pools(&self) -> YieldResult<Arc<Vec<LlamaPool>>> {
        if let Some(pools) = self.snapshot_within(self.snapshot_ttl) {
            return Ok(pools);
        }

        let refresh = match Arc::clone(&self.refresh).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(stale) = self.snapshot_within(MAX_STALE_SNAPSHOT) {
                    debug!("Pool download in flight, serving previous snapshot");
                    return Ok(stale);
                }
                Arc::clone(&self.refresh).lock_owned().await
            }
        };

        // Another caller may have finished a download while we waited
        if let Some(pools) = self.snapshot_within(self.snapshot_ttl) {
            return Ok(pools);
        }

        let http = self.http.clone();
        let url = format!("{}/pools", self.yields_url);
        let snapshot = Arc::clone(&self.pools);
        let download = tokio::spawn(async move {
            let _refresh = refresh;
            let result = http.download_pools(&url).await;
            if let Ok(pools) = &result {
                *snapshot.write() = Some(PoolsSnapshot {
                    fetched_at: Instant::now(),
                    pools: Arc::clone(pools),
                });
            }
            result
        });

        let result = match download.await {
            Ok(result) => result,
            Err(e) => Err(YieldError::internal(format!("Pool download task failed: {}", e))),
        };

        match result {
            Ok(pools) => Ok(pools),
            Err(e) => match self.snapshot_within(MAX_STALE_SNAPSHOT) {
                Some(stale) => {
                    warn!("Pool refresh failed, serving previous snapshot: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    fn snapshot_within(&self, max_age: Duration) -> Option<Arc<Vec<LlamaPool>>> {
        self.pools
            .read()
            .as_ref()
            .filter(|s| s.fetched_at.elapsed() < max_age)
            .map(|s| Arc::clone(&s.pools))
    }

    /// Historical TVL/APY for a single pool
    #[instrument(skip(self))]
    pub async fn pool_chart(&self, pool_id: &str) -> YieldResult<Vec<ChartPoint>> {
        let url = format!("{}/chart/{}", self.yields_url, pool_id);
        let envelope: LlamaEnvelope<Vec<LlamaChartPoint>> = self.http.get_json(&url).await?;

        if envelope.status != "success" {
            return Err(YieldError::not_found(format!(
                "No chart data for pool {}",
                pool_id
            )));
        }

        Ok(envelope.data.iter().map(|p| p.to_chart_point()).collect())
    }

    /// 24h/7d/30d DEX volume summary for a protocol
    #[instrument(skip(self))]
    pub async fn dex_summary(&self, protocol: &str) -> YieldResult<DexSummary> {
        let url = format!(
            "{}/summary/dexs/{}?excludeTotalDataChart=true&excludeTotalDataChartBreakdown=true",
            self.api_url, protocol
        );
        self.http.get_json(&url).await
    }
}

#[async_trait]
impl ChartProvider for LlamaYieldsClient {
    async fn chart(&self, pool_id: &str) -> YieldResult<Vec<ChartPoint>> {
        self.pool_chart(pool_id).await
    }
}
