//! Aggregation Manager
//!
//! Fans out to every registered source, merges and deduplicates what comes
//! back, and keeps the merged list and its summary statistics cached.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use yield_core::{Opportunity, SourceAdapter};

use crate::cache_store::CacheStore;

/// Cache key of the merged opportunity list
pub const ALL_OPPORTUNITIES_KEY: &str = "all_opportunities";
/// Cache key of the summary statistics
pub const ADAPTER_STATS_KEY: &str = "adapter_stats";

const OPPORTUNITIES_TTL: Duration = Duration::from_secs(5 * 60);
const STATS_TTL: Duration = Duration::from_secs(10 * 60);

/// Summary statistics over the merged opportunity list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterStats {
    pub total_opportunities: usize,
    pub by_source: BTreeMap<String, usize>,
    pub by_protocol: BTreeMap<String, usize>,
    pub total_tvl: Decimal,
    pub average_apy: f64,
    pub generated_at: Option<DateTime<Utc>>,
}

impl AdapterStats {
    pub fn from_opportunities(opportunities: &[Opportunity]) -> Self {
        let mut by_source = BTreeMap::new();
        let mut by_protocol = BTreeMap::new();
        for o in opportunities {
            *by_source.entry(o.source.clone()).or_insert(0) += 1;
            *by_protocol.entry(o.protocol.clone()).or_insert(0) += 1;
        }

        let average_apy = if opportunities.is_empty() {
            0.0
        } else {
            opportunities.iter().map(|o| o.apy).sum::<f64>() / opportunities.len() as f64
        };

        Self {
            total_opportunities: opportunities.len(),
            by_source,
            by_protocol,
            total_tvl: opportunities.iter().map(|o| o.tvl_usd).sum(),
            average_apy,
            generated_at: Some(Utc::now()),
        }
    }
}

/// Merges opportunities from every registered source
pub struct AggregationManager {
    adapters: RwLock<Vec<Arc<dyn SourceAdapter>>>,
    cache: Arc<CacheStore>,
    /// Most recent successful batch per source, used while that source is failing
    last_good: RwLock<HashMap<String, Vec<Opportunity>>>,
}

/// One fan-out round: per-source results (`None` on failure) merged with
/// last-known-good data for the failures
struct FetchRound {
    results: Vec<(String, Option<Vec<Opportunity>>)>,
    merged: Vec<Opportunity>,
}

impl FetchRound {
    /// Every source answered and the merge produced data
    fn is_complete(&self) -> bool {
        !self.merged.is_empty() && self.results.iter().all(|(_, batch)| batch.is_some())
    }

    fn failed_sources(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, batch)| batch.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl AggregationManager {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self {
            adapters: RwLock::new(Vec::new()),
            cache,
            last_good: RwLock::new(HashMap::new()),
        }
    }

    /// Register a source. Registration order decides which duplicate wins.
    pub fn register(&self, adapter: Arc<dyn SourceAdapter>) {
        let name = adapter.protocol_info().name;
        self.adapters.write().push(adapter);
        debug!("Registered adapter {}", name);
    }

    pub fn adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters.read().clone()
    }

    pub fn protocols(&self) -> Vec<String> {
        self.adapters
            .read()
            .iter()
            .map(|a| a.protocol_info().name)
            .collect()
    }

    /// Merged, deduplicated, sorted opportunities from every source.
    ///
    /// Served from cache when fresh. A failing source contributes its last
    /// successful batch, so this never errors. Only a complete, non-empty
    /// merge is cached; a degraded one is returned but refetched next call.
    #[instrument(skip(self))]
    pub async fn get_all_opportunities(&self) -> Vec<Opportunity> {
        match self.cache.get::<Vec<Opportunity>>(ALL_OPPORTUNITIES_KEY) {
            Ok(Some(cached)) => {
                debug!("Serving {} opportunities from cache", cached.len());
                return cached;
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed, refetching: {}", e),
        }

        self.fetch_round().await.merged
    }

    /// Fan out, merge with last-known-good data, and cache only a complete result
    async fn fetch_round(&self) -> FetchRound {
        let results = self.fetch_each().await;
        let merged = {
            let last_good = self.last_good.read();
            merge_opportunities(results.iter().map(|(name, batch)| match batch {
                Some(batch) => batch.clone(),
                None => last_good.get(name).cloned().unwrap_or_default(),
            }))
        };

        let round = FetchRound { results, merged };
        if round.is_complete() {
            self.store_opportunities(&round.merged);
        } else {
            warn!(
                "Not caching degraded merge of {} opportunities, failed sources: {:?}",
                round.merged.len(),
                round.failed_sources()
            );
        }
        round
    }

    /// List every adapter in parallel; a failing adapter yields `None`
    async fn fetch_each(&self) -> Vec<(String, Option<Vec<Opportunity>>)> {
        let adapters = self.adapters();

        let results = join_all(adapters.iter().map(|adapter| async move {
            let name = adapter.protocol_info().name;
            match adapter.list().await {
                Ok(opportunities) => {
                    debug!("{} returned {} opportunities", name, opportunities.len());
                    (name, Some(opportunities))
                }
                Err(e) => {
                    warn!("Failed to fetch opportunities from {}: {}", name, e);
                    (name, None)
                }
            }
        }))
        .await;

        let mut last_good = self.last_good.write();
        for (name, batch) in &results {
            if let Some(batch) = batch {
                last_good.insert(name.clone(), batch.clone());
            }
        }
        results
    }

    fn store_opportunities(&self, opportunities: &[Opportunity]) {
        if let Err(e) = self
            .cache
            .set(ALL_OPPORTUNITIES_KEY, &opportunities, OPPORTUNITIES_TTL)
        {
            warn!("Failed to cache opportunities: {}", e);
        }
    }

    /// Adapter owning `id`: the longest registered protocol name that
    /// prefixes the id followed by `-`
    pub fn adapter_for_id(&self, id: &str) -> Result<Arc<dyn SourceAdapter>, AggregationError> {
        self.adapters
            .read()
            .iter()
            .filter_map(|adapter| {
                let info = adapter.protocol_info();
                info.owns_id(id).then(|| (info.name.len(), Arc::clone(adapter)))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, adapter)| adapter)
            .ok_or_else(|| AggregationError::UnknownAdapter(id.to_string()))
    }

    /// Single opportunity by id, or `None` if its adapter is unknown or fails
    #[instrument(skip(self))]
    pub async fn get_opportunity_by_id(&self, id: &str) -> Option<Opportunity> {
        let adapter = match self.adapter_for_id(id) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };

        match adapter.detail(id).await {
            Ok(opportunity) => Some(opportunity),
            Err(e) => {
                warn!("Failed to fetch opportunity {}: {}", id, e);
                None
            }
        }
    }

    /// Summary statistics, cached separately from the list and only when
    /// they describe a complete merge
    pub async fn get_adapter_stats(&self) -> AdapterStats {
        match self.cache.get::<AdapterStats>(ADAPTER_STATS_KEY) {
            Ok(Some(stats)) => return stats,
            Ok(None) => {}
            Err(e) => warn!("Cache read failed, recomputing stats: {}", e),
        }

        let cached = self.cache.get::<Vec<Opportunity>>(ALL_OPPORTUNITIES_KEY);
        let (opportunities, complete) = match cached {
            Ok(Some(cached)) => (cached, true),
            Ok(None) | Err(_) => {
                let round = self.fetch_round().await;
                let complete = round.is_complete();
                (round.merged, complete)
            }
        };
        let stats = AdapterStats::from_opportunities(&opportunities);

        if complete {
            if let Err(e) = self.cache.set(ADAPTER_STATS_KEY, &stats, STATS_TTL) {
                warn!("Failed to cache adapter stats: {}", e);
            }
        }
        stats
    }

    /// Drop cached results and refetch every adapter independently.
    ///
    /// Returns each protocol's own result (empty on failure) and re-primes
    /// the merged list when every adapter answered.
    #[instrument(skip(self))]
    pub async fn refresh_all_data(&self) -> HashMap<String, Vec<Opportunity>> {
        for key in [ALL_OPPORTUNITIES_KEY, ADAPTER_STATS_KEY] {
            if let Err(e) = self.cache.delete(key) {
                warn!("Failed to invalidate {}: {}", key, e);
            }
        }

        let round = self.fetch_round().await;
        info!(
            "Refreshed {} adapters, {} opportunities after merge",
            round.results.len(),
            round.merged.len()
        );
        round
            .results
            .into_iter()
            .map(|(name, batch)| (name, batch.unwrap_or_default()))
            .collect()
    }

    /// Shallow health signal: each adapter is healthy if `list()` returns data
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let adapters = self.adapters();
        join_all(adapters.iter().map(|adapter| async move {
            let healthy = matches!(adapter.list().await, Ok(list) if !list.is_empty());
            (adapter.protocol_info().name, healthy)
        }))
        .await
        .into_iter()
        .collect()
    }
}

/// Concatenate batches, drop duplicates and sort
pub fn merge_opportunities<I>(batches: I) -> Vec<Opportunity>
where
    I: IntoIterator<Item = Vec<Opportunity>>,
{
    let all: Vec<Opportunity> = batches.into_iter().flatten().collect();
    let mut unique = dedup_opportunities(all);
    sort_opportunities(&mut unique);
    unique
}

/// Keep the first occurrence of each case-insensitive `protocol-pool` key
pub fn dedup_opportunities(opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
    let mut seen = HashSet::new();
    opportunities
        .into_iter()
        .filter(|o| seen.insert(o.dedup_key()))
        .collect()
}

/// TVL descending, then APY descending
pub fn sort_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.tvl_usd.cmp(&a.tvl_usd).then_with(|| {
            b.apy
                .partial_cmp(&a.apy)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregationError {
    #[error("No adapter registered for opportunity {0}")]
    UnknownAdapter(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::CacheConfig;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use yield_core::{ProtocolInfo, YieldError, YieldResult};

    struct StaticSource {
        name: &'static str,
        items: Vec<Opportunity>,
        fail: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SourceAdapter for StaticSource {
        async fn list(&self) -> YieldResult<Vec<Opportunity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(YieldError::network("boom"))
            } else {
                Ok(self.items.clone())
            }
        }

        fn protocol_info(&self) -> ProtocolInfo {
            ProtocolInfo {
                name: self.name.to_string(),
                chain: "all".to_string(),
                base_url: "mock://".to_string(),
                rate_limit: 60,
                timeout_ms: 1_000,
                retry_attempts: 1,
            }
        }
    }

    fn source(name: &'static str, items: Vec<Opportunity>, fail: bool) -> Arc<StaticSource> {
        Arc::new(StaticSource {
            name,
            items,
            fail: AtomicBool::new(fail),
            calls: AtomicU32::new(0),
        })
    }

    fn opp(protocol: &str, pool: &str, tvl: Decimal, apy: f64) -> Opportunity {
        Opportunity {
            id: format!("{}-{}", protocol, pool),
            chain: "Ethereum".to_string(),
            protocol: protocol.to_string(),
            pool: pool.to_string(),
            tokens: vec![],
            apr: apy,
            apy,
            apy_base: None,
            apy_reward: None,
            reward_tokens: vec![],
            tvl_usd: tvl,
            risk: Default::default(),
            source: "mock".to_string(),
            last_updated: Utc::now(),
            metadata: None,
        }
    }

    fn manager() -> AggregationManager {
        AggregationManager::new(Arc::new(
            CacheStore::new_in_memory(CacheConfig::default()).unwrap(),
        ))
    }

    #[test]
    fn test_sort_by_tvl_then_apy() {
        let mut list = vec![
            opp("a", "1", dec!(100), 5.0),
            opp("a", "2", dec!(300), 1.0),
            opp("a", "3", dec!(100), 9.0),
        ];
        sort_opportunities(&mut list);
        let pools: Vec<&str> = list.iter().map(|o| o.pool.as_str()).collect();
        assert_eq!(pools, vec!["2", "3", "1"]);
    }

    #[test]
    fn test_dedup_first_seen_wins() {
        let list = vec![
            opp("Aave", "USDC", dec!(1), 1.0),
            opp("aave", "usdc", dec!(2), 2.0),
            opp("aave", "dai", dec!(3), 3.0),
        ];
        let unique = dedup_opportunities(list);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].tvl_usd, dec!(1));
    }

    #[tokio::test]
    async fn test_cached_list_skips_adapters() {
        let manager = manager();
        let s = source("aave", vec![opp("aave", "usdc", dec!(5), 1.0)], false);
        manager.register(s.clone());

        assert_eq!(manager.get_all_opportunities().await.len(), 1);
        assert_eq!(manager.get_all_opportunities().await.len(), 1);
        assert_eq!(s.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_adapter_for_id_prefers_longest_prefix() {
        let manager = manager();
        manager.register(source("aave", vec![], false));
        manager.register(source("aave-v3", vec![], false));

        let owner = manager.adapter_for_id("aave-v3-747c1d2a").unwrap();
        assert_eq!(owner.protocol_info().name, "aave-v3");
        let owner = manager.adapter_for_id("aave-0xabc").unwrap();
        assert_eq!(owner.protocol_info().name, "aave");

        assert!(matches!(
            manager.adapter_for_id("curve-3pool"),
            Err(AggregationError::UnknownAdapter(_))
        ));
        assert!(manager.get_opportunity_by_id("curve-3pool").await.is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_routes_to_detail() {
        let manager = manager();
        manager.register(source("lido", vec![opp("lido", "stETH", dec!(9), 3.0)], false));

        let found = manager.get_opportunity_by_id("lido-stETH").await.unwrap();
        assert_eq!(found.pool, "stETH");
        assert!(manager.get_opportunity_by_id("lido-missing").await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_reports_each_adapter() {
        let manager = manager();
        manager.register(source("ok", vec![opp("ok", "p", dec!(1), 1.0)], false));
        manager.register(source("bad", vec![], true));

        let results = manager.refresh_all_data().await;
        assert_eq!(results["ok"].len(), 1);
        assert!(results["bad"].is_empty());

        let health = manager.health_check().await;
        assert_eq!(health["ok"], true);
        assert_eq!(health["bad"], false);
    }

    #[tokio::test]
    async fn test_adapter_stats() {
        let manager = manager();
        manager.register(source(
            "aave",
            vec![opp("aave", "a", dec!(100), 2.0), opp("aave", "b", dec!(50), 4.0)],
            false,
        ));

        let stats = manager.get_adapter_stats().await;
        assert_eq!(stats.total_opportunities, 2);
        assert_eq!(stats.total_tvl, dec!(150));
        assert_eq!(stats.average_apy, 3.0);
        assert_eq!(stats.by_protocol["aave"], 2);
        assert_eq!(stats.by_source["mock"], 2);
    }

    #[tokio::test]
    async fn test_outage_is_not_cached_and_recovers() {
        let manager = manager();
        let s = source("aave", vec![opp("aave", "usdc", dec!(5), 1.0)], true);
        manager.register(s.clone());

        // Nothing known yet, so the outage yields an empty list that is not cached
        assert!(manager.get_all_opportunities().await.is_empty());
        assert!(manager.get_all_opportunities().await.is_empty());
        assert_eq!(s.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get_adapter_stats().await.total_opportunities, 0);

        s.fail.store(false, Ordering::SeqCst);
        assert_eq!(manager.get_all_opportunities().await.len(), 1);
        assert_eq!(manager.get_adapter_stats().await.total_opportunities, 1);
        assert_eq!(s.calls.load(Ordering::SeqCst), 4);

        // Recovered data is cached again
        manager.get_all_opportunities().await;
        assert_eq!(s.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_source_serves_last_good_batch() {
        let manager = manager();
        let steady = source("lido", vec![opp("lido", "steth", dec!(50), 3.0)], false);
        let flaky = source("aave", vec![opp("aave", "usdc", dec!(90), 2.0)], false);
        manager.register(steady.clone());
        manager.register(flaky.clone());

        assert_eq!(manager.refresh_all_data().await.len(), 2);

        flaky.fail.store(true, Ordering::SeqCst);
        let results = manager.refresh_all_data().await;
        assert!(results["aave"].is_empty());

        // The refreshed merge still carries aave's previous pools
        let list = manager.get_all_opportunities().await;
        let pools: Vec<&str> = list.iter().map(|o| o.pool.as_str()).collect();
        assert_eq!(pools, vec!["usdc", "steth"]);

        // Degraded merges are refetched on every call rather than cached
        let before = steady.calls.load(Ordering::SeqCst);
        manager.get_all_opportunities().await;
        assert_eq!(steady.calls.load(Ordering::SeqCst), before + 1);
    }
}
