//! End-to-end flows through the yield engine with mock sources
//!
//! Run with: cargo test -p yield-services --test engine_flow

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use yield_core::{
    Opportunity, ProtocolInfo, ProtocolMetricsSource, RiskBucket, SourceAdapter, VolumeData,
    YieldError, YieldResult,
};
use yield_services::{
    AggregationMethod, CacheConfig, CacheStore, EngineConfig, HealthStatus, YieldEngine,
};

fn opportunity(protocol: &str, pool: &str, tvl: Decimal, apy: f64) -> Opportunity {
    Opportunity {
        id: format!("{}-{}", protocol.to_lowercase(), pool.to_lowercase()),
        chain: "Ethereum".to_string(),
        protocol: protocol.to_string(),
        pool: pool.to_string(),
        tokens: vec![pool.to_string()],
        apr: apy,
        apy,
        apy_base: Some(apy),
        apy_reward: None,
        reward_tokens: vec![],
        tvl_usd: tvl,
        risk: RiskBucket::Medium,
        source: "mock".to_string(),
        last_updated: Utc::now(),
        metadata: None,
    }
}

struct MockSource {
    name: String,
    opportunities: Vec<Opportunity>,
    fail: AtomicBool,
    calls: AtomicU32,
}

impl MockSource {
    fn new(name: &str, opportunities: Vec<Opportunity>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            opportunities,
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        let source = Self::new(name, vec![]);
        source.set_failing(true);
        source
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    async fn list(&self) -> YieldResult<Vec<Opportunity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(YieldError::network(format!("{} unreachable", self.name)));
        }
        Ok(self.opportunities.clone())
    }

    fn protocol_info(&self) -> ProtocolInfo {
        ProtocolInfo {
            name: self.name.clone(),
            chain: "all".to_string(),
            base_url: "http://mock".to_string(),
            rate_limit: 60,
            timeout_ms: 1_000,
            retry_attempts: 1,
        }
    }
}

struct SlowMetrics {
    calls: AtomicU32,
}

#[async_trait]
impl ProtocolMetricsSource for SlowMetrics {
    async fn volume(&self, protocol: &str) -> YieldResult<VolumeData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(VolumeData {
            protocol: protocol.to_string(),
            pool: None,
            volume_24h: dec!(1000),
            volume_7d: dec!(7000),
            volume_30d: dec!(30000),
            concentration_risk: 0.1,
            timestamp: Utc::now(),
        })
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.reliability.retry_delay_ms = 1;
    config.reliability.max_retries = 1;
    config.sync.protocols = vec!["alpha".to_string()];
    config
}

fn build(config: EngineConfig, sources: Vec<Arc<MockSource>>) -> YieldEngine {
    let cache = Arc::new(CacheStore::new_in_memory(CacheConfig::default()).unwrap());
    let adapters: Vec<Arc<dyn SourceAdapter>> = sources
        .into_iter()
        .map(|s| s as Arc<dyn SourceAdapter>)
        .collect();
    let metrics = Arc::new(SlowMetrics {
        calls: AtomicU32::new(0),
    });
    YieldEngine::new(config, cache, adapters, metrics, None)
}

#[tokio::test]
async fn test_case_variant_duplicates_collapse() {
    let a = MockSource::new("alpha", vec![opportunity("x", "p", dec!(100), 5.0)]);
    let b = MockSource::new("beta", vec![opportunity("X", "P", dec!(200), 6.0)]);
    let engine = build(config(), vec![a, b]);

    let list = engine.list_opportunities().await;
    assert_eq!(list.len(), 1);
    // First registered source wins
    assert_eq!(list[0].protocol, "x");
    assert_eq!(list[0].tvl_usd, dec!(100));
}

#[tokio::test]
async fn test_partial_failure_keeps_healthy_sources() {
    let good = MockSource::new(
        "alpha",
        vec![
            opportunity("alpha", "usdc", dec!(100), 3.0),
            opportunity("alpha", "weth", dec!(300), 1.0),
        ],
    );
    let bad = MockSource::failing("beta");
    let engine = build(config(), vec![good, bad.clone()]);

    let list = engine.list_opportunities().await;
    assert_eq!(list.len(), 2);
    assert!(bad.calls.load(Ordering::SeqCst) >= 1);

    let health = engine.get_system_health();
    let beta = health.adapters.iter().find(|a| a.name == "beta").unwrap();
    assert_eq!(beta.consecutive_failures, 1);
    assert!(beta.last_error.is_some());
}

#[tokio::test]
async fn test_source_outage_then_recovery() {
    let steady = MockSource::new("alpha", vec![opportunity("alpha", "usdc", dec!(100), 3.0)]);
    let flaky = MockSource::new("beta", vec![opportunity("beta", "weth", dec!(500), 2.0)]);
    flaky.set_failing(true);
    let engine = build(config(), vec![steady.clone(), flaky.clone()]);

    // While beta is down the list is partial and is refetched on every call
    assert_eq!(engine.list_opportunities().await.len(), 1);
    assert_eq!(engine.list_opportunities().await.len(), 1);
    assert_eq!(steady.calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.get_adapter_stats().await.total_opportunities, 1);

    flaky.set_failing(false);
    let pools: Vec<String> = engine
        .list_opportunities()
        .await
        .into_iter()
        .map(|o| o.pool)
        .collect();
    assert_eq!(pools, vec!["weth", "usdc"]);

    let health = engine.get_system_health();
    let beta = health.adapters.iter().find(|a| a.name == "beta").unwrap();
    assert_eq!(beta.status, HealthStatus::Healthy);
    assert_eq!(beta.consecutive_failures, 0);

    // The complete list is cached again
    let calls = steady.calls.load(Ordering::SeqCst);
    engine.list_opportunities().await;
    assert_eq!(steady.calls.load(Ordering::SeqCst), calls);
    assert_eq!(engine.get_adapter_stats().await.total_opportunities, 2);

    // A second outage keeps serving beta's last good pools
    flaky.set_failing(true);
    let refreshed = engine.refresh_all().await;
    assert_eq!(refreshed.get("beta").map(Vec::len), Some(0));
    assert_eq!(engine.list_opportunities().await.len(), 2);
}

#[tokio::test]
async fn test_sorted_by_tvl_then_apy() {
    let source = MockSource::new(
        "alpha",
        vec![
            opportunity("alpha", "a", dec!(100), 9.0),
            opportunity("alpha", "b", dec!(500), 1.0),
            opportunity("alpha", "c", dec!(100), 12.0),
        ],
    );
    let engine = build(config(), vec![source]);

    let pools: Vec<String> = engine
        .list_opportunities()
        .await
        .into_iter()
        .map(|o| o.pool)
        .collect();
    assert_eq!(pools, vec!["b", "c", "a"]);
}

#[tokio::test]
async fn test_list_is_served_from_cache_until_refresh() {
    let source = MockSource::new("alpha", vec![opportunity("alpha", "a", dec!(1), 1.0)]);
    let engine = build(config(), vec![source.clone()]);

    engine.list_opportunities().await;
    engine.list_opportunities().await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    let refreshed = engine.refresh_all().await;
    assert_eq!(refreshed.get("alpha").map(Vec::len), Some(1));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    let stats = engine.get_adapter_stats().await;
    assert_eq!(stats.total_opportunities, 1);
}

#[tokio::test]
async fn test_consensus_without_enough_sources_is_unavailable() {
    let mut config = config();
    config.reliability.aggregation_method = AggregationMethod::Consensus;
    config.reliability.min_sources = 2;

    let good = MockSource::new("alpha", vec![opportunity("alpha", "a", dec!(1), 1.0)]);
    let bad = MockSource::failing("beta");
    let engine = build(config, vec![good, bad]);

    let err = engine.fetch_with_strategy().await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_primary_fallback_skips_failed_primary() {
    let bad = MockSource::failing("alpha");
    let good = MockSource::new("beta", vec![opportunity("beta", "a", dec!(1), 1.0)]);
    let engine = build(config(), vec![bad, good]);

    let outcome = engine.fetch_with_strategy().await.unwrap();
    assert_eq!(outcome.sources_used, vec!["beta".to_string()]);
    assert_eq!(outcome.opportunities.len(), 1);
}

#[tokio::test]
async fn test_repeated_failures_mark_source_down() {
    let bad = MockSource::failing("alpha");
    let engine = build(config(), vec![bad]);

    for _ in 0..5 {
        engine.coordinator().probe_all().await;
    }

    let health = engine.get_system_health();
    assert_eq!(health.adapters[0].status, HealthStatus::Down);
    assert_eq!(health.down_sources(), vec!["alpha".to_string()]);

    let alerts = engine.evaluate_risk().await.unwrap();
    assert!(alerts.iter().any(|a| a.metric == "source:alpha"));
}

#[tokio::test]
async fn test_concurrent_force_sync_runs_once() {
    let source = MockSource::new("alpha", vec![]);
    let engine = Arc::new(build(config(), vec![source]));

    let (first, second) = tokio::join!(engine.force_sync(), engine.force_sync());

    // The second call finds a cycle in flight and returns without running
    assert_eq!(first.successful_syncs, 1);
    assert_eq!(second.successful_syncs + second.failed_syncs, 0);
    assert_eq!(engine.sync_stats().successful_syncs, 1);
    assert!(engine.get_protocol_metrics("alpha").unwrap().volume.is_some());
}
