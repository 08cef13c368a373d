//! Yield engine
//!
//! Owns every sub-service, wires sources through the reliability coordinator
//! into the aggregation manager, and runs the background tasks. This is the
//! surface the HTTP layer talks to.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use yield_core::{
    AggregatedMetrics, AuditInfo, ChartPoint, ChartProvider, Opportunity, ProtocolMetricsSource,
    SocialMetrics, SourceAdapter, UserMetrics, VolumeData, YieldError,
};

use crate::aggregation::{AdapterStats, AggregationError, AggregationManager};
use crate::cache_store::{CacheError, CacheStats, CacheStore};
use crate::config::EngineConfig;
use crate::periodic::PeriodicTask;
use crate::reliability::{ReliabilityCoordinator, ReliabilityError, StrategyOutcome, SystemHealth};
use crate::risk::{
    OpportunityRiskAnalyzer, PortfolioRisk, RiskAlert, RiskAssessment, RiskMonitor, SystemSignals,
};
use crate::sync_scheduler::{BackgroundSyncScheduler, SyncStats};

/// How long fetched chart series stay cached
pub const CHART_TTL: Duration = Duration::from_secs(15 * 60);

/// Opportunities older than this fail the data-quality check
const STALE_AFTER_SECS: i64 = 60 * 60;

/// Highest APY (percent) considered plausible by the data-quality check
const MAX_PLAUSIBLE_APY: f64 = 1_000.0;

/// Everything known about one opportunity
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityDetail {
    pub opportunity: Opportunity,
    pub risk: RiskAssessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social: Option<SocialMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparable: Option<Vec<Opportunity>>,
}

/// Cached metrics for one protocol, as last synced
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolMetrics {
    pub protocol: String,
    pub volume: Option<VolumeData>,
    pub users: Option<UserMetrics>,
}

pub struct YieldEngine {
    config: EngineConfig,
    cache: Arc<CacheStore>,
    coordinator: Arc<ReliabilityCoordinator>,
    aggregation: Arc<AggregationManager>,
    scheduler: Arc<BackgroundSyncScheduler>,
    monitor: Arc<RiskMonitor>,
    analyzer: OpportunityRiskAnalyzer,
    charts: Option<Arc<dyn ChartProvider>>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl YieldEngine {
    /// Build the engine around an existing cache. Every adapter is registered
    /// with the coordinator first, and its guarded wrapper is what the
    /// aggregation manager sees.
    pub fn new(
        config: EngineConfig,
        cache: Arc<CacheStore>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        metrics: Arc<dyn ProtocolMetricsSource>,
        charts: Option<Arc<dyn ChartProvider>>,
    ) -> Self {
        let coordinator = Arc::new(ReliabilityCoordinator::new(config.reliability.clone()));
        let aggregation = Arc::new(AggregationManager::new(Arc::clone(&cache)));

        for adapter in adapters {
            let guarded = coordinator.register(adapter);
            aggregation.register(guarded);
        }

        let scheduler = Arc::new(BackgroundSyncScheduler::new(
            metrics,
            Arc::clone(&cache),
            config.sync.clone(),
        ));
        let monitor = Arc::new(RiskMonitor::new(config.risk.clone()));
        let analyzer = OpportunityRiskAnalyzer::new(config.risk.weights);

        info!(
            "Yield engine ready with {} sources ({})",
            aggregation.protocols().len(),
            config.reliability.aggregation_method
        );

        Self {
            config,
            cache,
            coordinator,
            aggregation,
            scheduler,
            monitor,
            analyzer,
            charts,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the engine with a cache file at `config.db_path`
    pub fn open(
        config: EngineConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        metrics: Arc<dyn ProtocolMetricsSource>,
        charts: Option<Arc<dyn ChartProvider>>,
    ) -> Result<Self, EngineError> {
        let cache = CacheStore::new(Path::new(&config.db_path), config.cache.clone())?;
        Ok(Self::new(config, Arc::new(cache), adapters, metrics, charts))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<ReliabilityCoordinator> {
        &self.coordinator
    }

    pub fn aggregation(&self) -> &Arc<AggregationManager> {
        &self.aggregation
    }

    pub fn scheduler(&self) -> &Arc<BackgroundSyncScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<RiskMonitor> {
        &self.monitor
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn the cache sweep, health probe and risk evaluation tasks and
    /// start the metrics sync schedule. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            debug!("Yield engine already started");
            return;
        }

        let weak = Arc::downgrade(self);
        tasks.push(PeriodicTask::spawn(
            "cache-sweep",
            self.cache.config().cleanup_interval(),
            with_engine(&weak, |engine| async move {
                match engine.cache.cleanup_expired() {
                    Ok(0) => {}
                    Ok(removed) => debug!("[CACHE] Swept {} expired entries", removed),
                    Err(e) => warn!("[CACHE] Sweep failed: {}", e),
                }
            }),
        ));

        tasks.push(PeriodicTask::spawn(
            "health-probe",
            self.config.reliability.health_check_interval(),
            with_engine(&weak, |engine| async move {
                let statuses = engine.coordinator.probe_all().await;
                debug!("[RELIABILITY] Probe finished for {} sources", statuses.len());
            }),
        ));

        tasks.push(PeriodicTask::spawn(
            "risk-evaluation",
            self.config.risk.check_interval(),
            with_engine(&weak, |engine| async move {
                if let Some(alerts) = engine.evaluate_risk().await {
                    if !alerts.is_empty() {
                        info!("[RISK] {} new alerts", alerts.len());
                    }
                }
            }),
        ));
        drop(tasks);

        self.scheduler.start();
        info!("Yield engine started");
    }

    /// Stop every background task and wait for them to exit
    pub async fn stop(&self) {
        let tasks: Vec<PeriodicTask> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.stop().await;
        }
        self.scheduler.stop().await;
        info!("Yield engine stopped");
    }

    // ------------------------------------------------------------------------
    // Opportunities
    // ------------------------------------------------------------------------

    /// Merged opportunities across every source, best first
    pub async fn list_opportunities(&self) -> Vec<Opportunity> {
        self.aggregation.get_all_opportunities().await
    }

    /// Opportunity with its risk assessment and whatever extras its source
    /// provides.
    ///
    /// Fails only when no source owns `id`; a source that cannot produce the
    /// opportunity yields `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn get_opportunity_detail(
        &self,
        id: &str,
    ) -> Result<Option<OpportunityDetail>, EngineError> {
        let adapter = self.aggregation.adapter_for_id(id)?;

        let Some(opportunity) = self.aggregation.get_opportunity_by_id(id).await else {
            return Ok(None);
        };

        let name = adapter.protocol_info().name;
        let uptime = self
            .coordinator
            .health_of(&name)
            .map(|h| h.uptime_ratio)
            .unwrap_or(0.0);
        let risk = self.analyzer.assess(&opportunity, uptime);

        let (audit, social, comparable) = futures::join!(
            adapter.audit_info(id),
            adapter.social_metrics(),
            adapter.comparable_pools(id)
        );

        Ok(Some(OpportunityDetail {
            opportunity,
            risk,
            audit,
            social,
            comparable,
        }))
    }

    /// Historical series for a pool, cached for [`CHART_TTL`]
    #[instrument(skip(self))]
    pub async fn get_chart_data(&self, pool_id: &str) -> Result<Vec<ChartPoint>, EngineError> {
        let key = format!("chart:{}", pool_id);
        match self.cache.get::<Vec<ChartPoint>>(&key) {
            Ok(Some(points)) => return Ok(points),
            Ok(None) => {}
            Err(e) => warn!("Chart cache read failed for {}: {}", pool_id, e),
        }

        let provider = self.charts.as_ref().ok_or(EngineError::NoChartProvider)?;
        let points = provider.chart(pool_id).await.map_err(EngineError::Chart)?;

        if let Err(e) = self.cache.set(&key, &points, CHART_TTL) {
            warn!("Failed to cache chart for {}: {}", pool_id, e);
        }
        Ok(points)
    }

    pub async fn get_adapter_stats(&self) -> AdapterStats {
        self.aggregation.get_adapter_stats().await
    }

    /// Drop the cached list and refetch every source
    pub async fn refresh_all(&self) -> HashMap<String, Vec<Opportunity>> {
        self.aggregation.refresh_all_data().await
    }

    /// Fetch through the configured multi-source strategy
    pub async fn fetch_with_strategy(&self) -> Result<StrategyOutcome, EngineError> {
        Ok(self.coordinator.fetch_with_strategy().await?)
    }

    // ------------------------------------------------------------------------
    // Health & metrics
    // ------------------------------------------------------------------------

    pub fn get_system_health(&self) -> SystemHealth {
        self.coordinator.system_health()
    }

    pub fn cache_stats(&self) -> Result<CacheStats, EngineError> {
        Ok(self.cache.stats()?)
    }

    pub async fn force_sync(&self) -> SyncStats {
        self.scheduler.force_sync().await
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.scheduler.stats()
    }

    /// Last synced volume and user metrics for `protocol`
    pub fn get_protocol_metrics(&self, protocol: &str) -> Result<ProtocolMetrics, EngineError> {
        Ok(ProtocolMetrics {
            protocol: protocol.to_string(),
            volume: self.cache.get_volume(protocol, None)?,
            users: self.cache.get_user_metrics(protocol)?,
        })
    }

    /// Last synced cross-protocol totals for the sync chain
    pub fn get_aggregated_metrics(&self) -> Result<Option<AggregatedMetrics>, EngineError> {
        let chain = self.scheduler.config().chain;
        Ok(self.cache.get_aggregated_metrics(&chain)?)
    }

    // ------------------------------------------------------------------------
    // Risk
    // ------------------------------------------------------------------------

    /// TVL-weighted risk of every listed opportunity
    pub async fn portfolio_risk(&self) -> PortfolioRisk {
        let opportunities = self.list_opportunities().await;
        let health = self.coordinator.system_health();
        self.assess_portfolio(&opportunities, &health)
    }

    fn assess_portfolio(&self, opportunities: &[Opportunity], health: &SystemHealth) -> PortfolioRisk {
        self.analyzer.assess_portfolio(opportunities, |o| {
            self.aggregation
                .adapter_for_id(&o.id)
                .map(|adapter| health.uptime_of(&adapter.protocol_info().name))
                .unwrap_or(0.0)
        })
    }

    /// Snapshot of the signals the risk monitor evaluates
    pub async fn collect_signals(&self) -> SystemSignals {
        let opportunities = self.list_opportunities().await;
        let health = self.coordinator.system_health();
        let portfolio = self.assess_portfolio(&opportunities, &health);

        SystemSignals {
            adapter_health_pct: health.healthy_percentage,
            data_quality_pct: data_quality(&opportunities),
            avg_response_time_ms: health.average_response_time_ms,
            risk_score: portfolio.score,
            sources_down: health.down_sources(),
        }
    }

    /// Run one risk evaluation. `None` when one is already in progress.
    pub async fn evaluate_risk(&self) -> Option<Vec<RiskAlert>> {
        self.monitor.check(self.collect_signals()).await
    }

    pub fn get_active_alerts(&self) -> Vec<RiskAlert> {
        self.monitor.active_alerts()
    }

    pub fn acknowledge_alert(&self, id: &str) -> bool {
        self.monitor.acknowledge(id)
    }
}

/// Tick body that upgrades a weak engine reference and runs `f` on it
fn with_engine<F, Fut>(
    weak: &Weak<YieldEngine>,
    f: F,
) -> impl FnMut() -> BoxFuture<'static, ()> + Send + 'static
where
    F: Fn(Arc<YieldEngine>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak = weak.clone();
    move || {
        let weak = weak.clone();
        let f = f.clone();
        Box::pin(async move {
            if let Some(engine) = weak.upgrade() {
                f(engine).await;
            }
        })
    }
}

/// Percentage of opportunities with positive TVL, a plausible APY and a
/// recent update. An empty list scores zero.
pub fn data_quality(opportunities: &[Opportunity]) -> f64 {
    if opportunities.is_empty() {
        return 0.0;
    }

    let now = Utc::now();
    let passing = opportunities
        .iter()
        .filter(|o| {
            o.tvl_usd > Decimal::ZERO
                && o.apy.is_finite()
                && (0.0..=MAX_PLAUSIBLE_APY).contains(&o.apy)
                && (now - o.last_updated).num_seconds() <= STALE_AFTER_SECS
        })
        .count();

    passing as f64 / opportunities.len() as f64 * 100.0
}

/// Errors surfaced by the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Reliability(#[from] ReliabilityError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("No chart provider configured")]
    NoChartProvider,

    #[error("Chart fetch failed: {0}")]
    Chart(YieldError),
}

impl EngineError {
    /// Whether the caller should see "no data available"
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            EngineError::Reliability(ReliabilityError::InsufficientHealthySources { .. })
                | EngineError::Reliability(ReliabilityError::AllSourcesFailed(_))
        )
    }
}
