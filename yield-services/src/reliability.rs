//! Reliability Coordinator
//!
//! Tracks the health of every registered source, guards calls with a circuit
//! breaker plus bounded retries, and implements the multi-source fetch
//! strategies (primary-fallback, fastest, consensus).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, select_ok};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use yield_core::{
    retry_with_backoff, AuditInfo, Opportunity, ProtocolInfo, SocialMetrics, SourceAdapter,
    YieldError, YieldResult,
};

use crate::aggregation::sort_opportunities;

/// Timeout for the background health probe's `list()` call
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Most adapters a consensus fetch consults
const CONSENSUS_MAX_SOURCES: usize = 3;

/// Consecutive failures before a source is reported degraded
const DEGRADED_AFTER: u32 = 3;
/// Consecutive failures before a source is reported down
const DOWN_AFTER: u32 = 5;

// ============================================================================
// Configuration
// ============================================================================

/// How `fetch_with_strategy` combines sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationMethod {
    /// Registration order, first success wins
    #[default]
    PrimaryFallback,
    /// Race healthy sources, first success wins
    Fastest,
    /// Several sources must succeed; results are reconciled by median
    Consensus,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::PrimaryFallback => "primary-fallback",
            AggregationMethod::Fastest => "fastest",
            AggregationMethod::Consensus => "consensus",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "primaryfallback" | "primary" => Ok(AggregationMethod::PrimaryFallback),
            "fastest" => Ok(AggregationMethod::Fastest),
            "consensus" => Ok(AggregationMethod::Consensus),
            _ => Err(format!("unknown aggregation method: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub threshold: u32,
    /// Cool-down after the last failure before a probe is let through
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
    pub aggregation_method: AggregationMethod,
    pub min_sources: usize,
    pub max_sources: usize,
    /// Per-attempt timeout, also the shared timeout of a fastest race
    pub timeout_ms: u64,
    pub health_check_interval_ms: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            circuit_breaker: CircuitBreakerConfig::default(),
            aggregation_method: AggregationMethod::PrimaryFallback,
            min_sources: 2,
            max_sources: 3,
            timeout_ms: 10_000,
            health_check_interval_ms: 30_000,
        }
    }
}

impl ReliabilityConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(1))
    }
}

// ============================================================================
// Health tracking
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }

    fn uptime_ratio(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 0.99,
            HealthStatus::Degraded => 0.8,
            HealthStatus::Down => 0.0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health record for a single source
#[derive(Debug, Clone, Serialize)]
pub struct AdapterHealth {
    pub name: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub uptime_ratio: f64,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Monotonic time of the last failure, drives the breaker cool-down
    #[serde(skip)]
    last_failure_at: Option<Instant>,
    /// Set while a half-open probe is in flight
    #[serde(skip)]
    probe_started_at: Option<Instant>,
}

impl AdapterHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            response_time_ms: 0,
            uptime_ratio: 1.0,
            consecutive_failures: 0,
            last_check: None,
            last_failure: None,
            last_error: None,
            last_failure_at: None,
            probe_started_at: None,
        }
    }

    fn record_success(&mut self, elapsed: Duration) {
        self.consecutive_failures = 0;
        self.status = HealthStatus::Healthy;
        self.uptime_ratio = self.status.uptime_ratio();
        self.response_time_ms = elapsed.as_millis() as u64;
        self.last_check = Some(Utc::now());
        self.probe_started_at = None;
    }

    fn record_failure(&mut self, elapsed: Duration, error: &str, breaker_threshold: u32) {
        // A failed half-open probe re-opens the breaker straight away
        self.consecutive_failures = if self.probe_started_at.take().is_some() {
            breaker_threshold.max(self.consecutive_failures + 1)
        } else {
            self.consecutive_failures + 1
        };

        if self.consecutive_failures >= DOWN_AFTER {
            self.status = HealthStatus::Down;
        } else if self.consecutive_failures >= DEGRADED_AFTER {
            self.status = HealthStatus::Degraded;
        }
        self.uptime_ratio = self.status.uptime_ratio();
        self.response_time_ms = elapsed.as_millis() as u64;

        let now = Utc::now();
        self.last_check = Some(now);
        self.last_failure = Some(now);
        self.last_failure_at = Some(Instant::now());
        self.last_error = Some(error.to_string());
    }

    fn breaker_open(&self, config: &CircuitBreakerConfig) -> bool {
        if let Some(started) = self.probe_started_at {
            return started.elapsed() < config.timeout();
        }
        self.consecutive_failures >= config.threshold
            && self
                .last_failure_at
                .map(|t| t.elapsed() < config.timeout())
                .unwrap_or(false)
    }

    fn is_usable(&self, config: &CircuitBreakerConfig) -> bool {
        self.status != HealthStatus::Down && !self.breaker_open(config)
    }
}

/// Snapshot of every source's health
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub adapters: Vec<AdapterHealth>,
    pub healthy_count: usize,
    pub total_count: usize,
    /// Percentage (0 - 100) of sources currently healthy
    pub healthy_percentage: f64,
    pub average_response_time_ms: f64,
}

impl SystemHealth {
    /// Uptime of a source by name, 0.0 for unknown sources
    pub fn uptime_of(&self, name: &str) -> f64 {
        self.adapters
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.uptime_ratio)
            .unwrap_or(0.0)
    }

    pub fn down_sources(&self) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|a| a.status == HealthStatus::Down)
            .map(|a| a.name.clone())
            .collect()
    }
}

/// Result of a strategy fetch
#[derive(Debug, Clone, Serialize)]
pub struct StrategyOutcome {
    pub method: AggregationMethod,
    pub sources_used: Vec<String>,
    pub opportunities: Vec<Opportunity>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Guards calls to registered sources and tracks their health
pub struct ReliabilityCoordinator {
    config: ReliabilityConfig,
    /// Sources in priority (registration) order
    sources: RwLock<Vec<(String, Arc<dyn SourceAdapter>)>>,
    health: RwLock<HashMap<String, AdapterHealth>>,
}

impl ReliabilityCoordinator {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            config,
            sources: RwLock::new(Vec::new()),
            health: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Register a raw source and get back its guarded wrapper
    pub fn register(self: &Arc<Self>, adapter: Arc<dyn SourceAdapter>) -> Arc<GuardedAdapter> {
        let name = adapter.protocol_info().name;

        self.health
            .write()
            .entry(name.clone())
            .or_insert_with(|| AdapterHealth::new(&name));
        self.sources.write().push((name.clone(), Arc::clone(&adapter)));

        info!("[RELIABILITY] Registered source {}", name);
        Arc::new(GuardedAdapter {
            name,
            inner: adapter,
            coordinator: Arc::clone(self),
        })
    }

    pub fn health_of(&self, name: &str) -> Option<AdapterHealth> {
        self.health.read().get(name).cloned()
    }

    /// Check the breaker and, when the cool-down has passed, admit one probe
    fn admit(&self, name: &str) -> Result<(), ReliabilityError> {
        let breaker = &self.config.circuit_breaker;
        let mut health = self.health.write();
        let record = health
            .get_mut(name)
            .ok_or_else(|| ReliabilityError::UnknownSource(name.to_string()))?;

        if record.breaker_open(breaker) {
            debug!("[RELIABILITY] Circuit open for {}", name);
            return Err(ReliabilityError::CircuitOpen(name.to_string()));
        }

        if record.probe_started_at.is_some() || record.consecutive_failures >= breaker.threshold {
            info!("[RELIABILITY] Circuit half-open for {}, letting one probe through", name);
            record.consecutive_failures = 0;
            record.probe_started_at = Some(Instant::now());
        }

        Ok(())
    }

    fn record_success(&self, name: &str, elapsed: Duration) {
        if let Some(record) = self.health.write().get_mut(name) {
            let recovered = record.status != HealthStatus::Healthy;
            record.record_success(elapsed);
            if recovered {
                info!("[RELIABILITY] {} recovered", name);
            }
        }
    }

    fn record_failure(&self, name: &str, elapsed: Duration, error: &YieldError) {
        let threshold = self.config.circuit_breaker.threshold;
        if let Some(record) = self.health.write().get_mut(name) {
            let before = record.status;
            record.record_failure(elapsed, &error.to_string(), threshold);
            if record.status != before {
                warn!(
                    "[RELIABILITY] {} is now {} after {} consecutive failures",
                    name, record.status, record.consecutive_failures
                );
            }
        }
    }

    /// Run `op` against source `name` behind the breaker, with retries and a
    /// per-attempt timeout. Health is updated once with the final outcome.
    pub async fn call<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T, ReliabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = YieldResult<T>>,
    {
        self.admit(name)?;

        let attempt_timeout = self.config.timeout();
        let timeout_ms = self.config.timeout_ms;
        let started = Instant::now();

        let result = retry_with_backoff(self.config.max_retries, self.config.retry_delay(), || {
            let fut = op();
            async move {
                tokio::time::timeout(attempt_timeout, fut)
                    .await
                    .unwrap_or(Err(YieldError::Timeout(timeout_ms)))
            }
        })
        .await;

        match result {
            Ok(value) => {
                self.record_success(name, started.elapsed());
                Ok(value)
            }
            Err(e) => {
                self.record_failure(name, started.elapsed(), &e);
                Err(ReliabilityError::Source {
                    name: name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Sources in priority order
    fn sources(&self) -> Vec<(String, Arc<dyn SourceAdapter>)> {
        self.sources.read().clone()
    }

    /// Sources that are not down and whose breaker is closed, in priority order
    fn usable_sources(&self) -> Vec<(String, Arc<dyn SourceAdapter>)> {
        let breaker = &self.config.circuit_breaker;
        let health = self.health.read();
        self.sources
            .read()
            .iter()
            .filter(|(name, _)| health.get(name).map(|h| h.is_usable(breaker)).unwrap_or(false))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Strategies
    // ------------------------------------------------------------------------

    /// Fetch opportunities using the configured aggregation method
    pub async fn fetch_with_strategy(&self) -> Result<StrategyOutcome, ReliabilityError> {
        self.fetch_with(self.config.aggregation_method).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_with(
        &self,
        method: AggregationMethod,
    ) -> Result<StrategyOutcome, ReliabilityError> {
        match method {
            AggregationMethod::PrimaryFallback => self.primary_fallback().await,
            AggregationMethod::Fastest => self.fastest().await,
            AggregationMethod::Consensus => self.consensus().await,
        }
    }

    async fn primary_fallback(&self) -> Result<StrategyOutcome, ReliabilityError> {
        let sources = self.sources();
        if sources.is_empty() {
            return Err(ReliabilityError::InsufficientHealthySources {
                available: 0,
                required: 1,
            });
        }

        let mut errors = Vec::new();
        for (name, source) in sources {
            match self.call(&name, || source.list()).await {
                Ok(opportunities) => {
                    debug!("[RELIABILITY] primary-fallback served by {}", name);
                    return Ok(StrategyOutcome {
                        method: AggregationMethod::PrimaryFallback,
                        sources_used: vec![name],
                        opportunities,
                    });
                }
                Err(e) => {
                    warn!("[RELIABILITY] {} failed, falling back: {}", name, e);
                    errors.push(e.to_string());
                }
            }
        }

        Err(ReliabilityError::AllSourcesFailed(errors.join("; ")))
    }

    async fn fastest(&self) -> Result<StrategyOutcome, ReliabilityError> {
        let candidates: Vec<_> = self
            .usable_sources()
            .into_iter()
            .take(self.config.max_sources.max(1))
            .collect();

        if candidates.is_empty() {
            return Err(ReliabilityError::InsufficientHealthySources {
                available: 0,
                required: 1,
            });
        }

        let races = candidates.into_iter().map(|(name, source)| {
            Box::pin(async move {
                let opportunities = self.call(&name, || source.list()).await?;
                Ok::<_, ReliabilityError>((name, opportunities))
            })
        });

        match tokio::time::timeout(self.config.timeout(), select_ok(races)).await {
            Ok(Ok(((name, opportunities), _rest))) => Ok(StrategyOutcome {
                method: AggregationMethod::Fastest,
                sources_used: vec![name],
                opportunities,
            }),
            Ok(Err(last)) => Err(ReliabilityError::AllSourcesFailed(last.to_string())),
            Err(_) => Err(ReliabilityError::Timeout(self.config.timeout_ms)),
        }
    }

    async fn consensus(&self) -> Result<StrategyOutcome, ReliabilityError> {
        let required = self.config.min_sources.max(1);
        let candidates: Vec<_> = self
            .usable_sources()
            .into_iter()
            .take(CONSENSUS_MAX_SOURCES)
            .collect();

        if candidates.len() < required {
            return Err(ReliabilityError::InsufficientHealthySources {
                available: candidates.len(),
                required,
            });
        }

        let shared_timeout = self.config.timeout();
        let timeout_ms = self.config.timeout_ms;
        let results = join_all(candidates.into_iter().map(|(name, source)| async move {
            let outcome = tokio::time::timeout(shared_timeout, self.call(&name, || source.list()))
                .await
                .unwrap_or(Err(ReliabilityError::Timeout(timeout_ms)));
            (name, outcome)
        }))
        .await;

        let mut successes = Vec::new();
        for (name, outcome) in results {
            match outcome {
                Ok(opportunities) => successes.push((name, opportunities)),
                Err(e) => warn!("[RELIABILITY] consensus source {} failed: {}", name, e),
            }
        }

        if successes.len() < required {
            return Err(ReliabilityError::InsufficientHealthySources {
                available: successes.len(),
                required,
            });
        }

        let sources_used = successes.iter().map(|(name, _)| name.clone()).collect();
        let opportunities = reconcile_consensus(&successes, required);
        Ok(StrategyOutcome {
            method: AggregationMethod::Consensus,
            sources_used,
            opportunities,
        })
    }

    // ------------------------------------------------------------------------
    // Health probe
    // ------------------------------------------------------------------------

    /// Exercise every raw source once with a short timeout, bypassing the
    /// breaker, and record the outcome
    pub async fn probe_all(&self) -> Vec<(String, HealthStatus)> {
        let sources = self.sources();

        let outcomes = join_all(sources.iter().map(|(name, source)| async move {
            let started = Instant::now();
            let outcome = tokio::time::timeout(PROBE_TIMEOUT, source.list())
                .await
                .unwrap_or(Err(YieldError::Timeout(PROBE_TIMEOUT.as_millis() as u64)));
            (name, started.elapsed(), outcome)
        }))
        .await;

        for (name, elapsed, outcome) in outcomes {
            match outcome {
                Ok(_) => self.record_success(name, elapsed),
                Err(e) => {
                    debug!("[RELIABILITY] probe of {} failed: {}", name, e);
                    self.record_failure(name, elapsed, &e);
                }
            }
        }

        let health = self.health.read();
        sources
            .iter()
            .filter_map(|(name, _)| health.get(name).map(|h| (name.clone(), h.status)))
            .collect()
    }

    pub fn system_health(&self) -> SystemHealth {
        let order = self.sources();
        let health = self.health.read();
        let adapters: Vec<AdapterHealth> = order
            .iter()
            .filter_map(|(name, _)| health.get(name).cloned())
            .collect();

        let total_count = adapters.len();
        let healthy_count = adapters
            .iter()
            .filter(|a| a.status == HealthStatus::Healthy)
            .count();

        let (healthy_percentage, average_response_time_ms) = if total_count == 0 {
            (0.0, 0.0)
        } else {
            (
                healthy_count as f64 / total_count as f64 * 100.0,
                adapters.iter().map(|a| a.response_time_ms as f64).sum::<f64>()
                    / total_count as f64,
            )
        };

        let status = if total_count > 0 && healthy_count == total_count {
            HealthStatus::Healthy
        } else if adapters.iter().all(|a| a.status == HealthStatus::Down) {
            HealthStatus::Down
        } else {
            HealthStatus::Degraded
        };

        SystemHealth {
            status,
            adapters,
            healthy_count,
            total_count,
            healthy_percentage,
            average_response_time_ms,
        }
    }
}

/// Keep opportunities reported by at least `min_agreement` sources, taking the
/// median TVL, APY and APR across the reports. The first report supplies the
/// remaining fields.
pub fn reconcile_consensus(
    results: &[(String, Vec<Opportunity>)],
    min_agreement: usize,
) -> Vec<Opportunity> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<(&str, &Opportunity)>> = HashMap::new();

    for (source, opportunities) in results {
        for opportunity in opportunities {
            let key = opportunity.dedup_key();
            let reports = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            // One vote per source
            if !reports.iter().any(|(s, _)| *s == source.as_str()) {
                reports.push((source.as_str(), opportunity));
            }
        }
    }

    let mut reconciled: Vec<Opportunity> = order
        .iter()
        .filter_map(|key| groups.get(key))
        .filter(|reports| reports.len() >= min_agreement)
        .filter_map(|reports| {
            let (_, first) = reports.first()?;
            let mut merged = (*first).clone();
            merged.tvl_usd = median_decimal(reports.iter().map(|(_, o)| o.tvl_usd).collect());
            merged.apy = median_f64(reports.iter().map(|(_, o)| o.apy).collect());
            merged.apr = median_f64(reports.iter().map(|(_, o)| o.apr).collect());
            Some(merged)
        })
        .collect();

    sort_opportunities(&mut reconciled);
    reconciled
}

fn median_f64(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn median_decimal(mut values: Vec<Decimal>) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / Decimal::TWO
    } else {
        values[mid]
    }
}

// ============================================================================
// Guarded adapter
// ============================================================================

/// A source whose calls go through the coordinator's breaker and retries
pub struct GuardedAdapter {
    name: String,
    inner: Arc<dyn SourceAdapter>,
    coordinator: Arc<ReliabilityCoordinator>,
}

impl GuardedAdapter {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl SourceAdapter for GuardedAdapter {
    async fn list(&self) -> YieldResult<Vec<Opportunity>> {
        let inner = &self.inner;
        Ok(self.coordinator.call(&self.name, || inner.list()).await?)
    }

    async fn detail(&self, id: &str) -> YieldResult<Opportunity> {
        let inner = &self.inner;
        Ok(self.coordinator.call(&self.name, || inner.detail(id)).await?)
    }

    fn protocol_info(&self) -> ProtocolInfo {
        self.inner.protocol_info()
    }

    async fn audit_info(&self, id: &str) -> Option<AuditInfo> {
        self.inner.audit_info(id).await
    }

    async fn social_metrics(&self) -> Option<SocialMetrics> {
        self.inner.social_metrics().await
    }

    async fn comparable_pools(&self, id: &str) -> Option<Vec<Opportunity>> {
        self.inner.comparable_pools(id).await
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReliabilityError {
    #[error("Circuit open for source {0}")]
    CircuitOpen(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Insufficient healthy sources: {available} available, {required} required")]
    InsufficientHealthySources { available: usize, required: usize },

    #[error("All sources failed: {0}")]
    AllSourcesFailed(String),

    #[error("Source {name} failed: {source}")]
    Source { name: String, source: YieldError },
}

impl From<ReliabilityError> for YieldError {
    fn from(e: ReliabilityError) -> Self {
        match e {
            ReliabilityError::CircuitOpen(name) => YieldError::CircuitOpen(name),
            ReliabilityError::Timeout(ms) => YieldError::Timeout(ms),
            ReliabilityError::Source { source, .. } => source,
            other => YieldError::internal(other.to_string()),
        }
    }
}
