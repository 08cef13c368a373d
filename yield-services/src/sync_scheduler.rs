//! Background Sync Scheduler
//!
//! Keeps protocol volume and user metrics warm in the cache by pulling them
//! from a [`ProtocolMetricsSource`] on a fixed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use yield_core::{AggregatedMetrics, ProtocolMetricsSource, UserMetrics, VolumeData, YieldError};

use crate::cache_store::{CacheError, CacheStore};
use crate::periodic::{PeriodicTask, RunGuard};

/// Bound on a single upstream metrics call
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Most recent sync errors kept in the stats
const MAX_ERROR_LOG: usize = 100;

/// Weight of the newest sample in the sync-duration moving average
const EMA_ALPHA: f64 = 0.2;

/// Configuration for the sync scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Attempts per protocol within one cycle
    pub retry_attempts: u32,
    /// Fixed delay between those attempts
    pub retry_delay_ms: u64,
    pub protocols: Vec<String>,
    /// Chain label of the aggregated totals
    pub chain: String,
    pub enable_aggregated_metrics: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30 * 60 * 1000,
            retry_attempts: 3,
            retry_delay_ms: 5 * 60 * 1000,
            protocols: vec!["uniswap-v3".to_string(), "curve-dex".to_string()],
            chain: "all".to_string(),
            enable_aggregated_metrics: true,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub protocol: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// Protocols stored by the most recent cycle
    pub protocols_updated: u32,
    /// Moving average of cycle duration
    pub avg_sync_time_ms: f64,
    pub errors: Vec<SyncErrorRecord>,
    pub is_running: bool,
}

/// Periodically syncs protocol metrics into the cache
pub struct BackgroundSyncScheduler {
    source: Arc<dyn ProtocolMetricsSource>,
    cache: Arc<CacheStore>,
    config: RwLock<SyncConfig>,
    stats: RwLock<SyncStats>,
    running: AtomicBool,
    task: Mutex<Option<PeriodicTask>>,
}

impl BackgroundSyncScheduler {
    pub fn new(
        source: Arc<dyn ProtocolMetricsSource>,
        cache: Arc<CacheStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            cache,
            config: RwLock::new(config),
            stats: RwLock::new(SyncStats::default()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    /// Whether a sync cycle is executing right now
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the periodic task is installed
    pub fn is_scheduled(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Install the periodic task if enabled and not already scheduled
    pub fn start(self: &Arc<Self>) {
        let config = self.config();
        if !config.enabled {
            info!("[SYNC] Background sync disabled");
            return;
        }

        let mut task = self.task.lock();
        if task.is_some() {
            debug!("[SYNC] Already scheduled");
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        *task = Some(PeriodicTask::spawn("metrics-sync", config.interval(), move || {
            let weak = weak.clone();
            async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.perform_sync().await;
                }
            }
        }));

        info!(
            "[SYNC] Scheduled every {:?} for {} protocols",
            config.interval(),
            config.protocols.len()
        );
    }

    /// Cancel the periodic task. A cycle in flight is abandoned.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
            info!("[SYNC] Stopped");
        }
    }

    /// Replace the configuration, rescheduling when the interval or the
    /// enabled flag changes
    pub async fn update_config(self: &Arc<Self>, new_config: SyncConfig) {
        let (interval_changed, enabled_changed) = {
            let mut config = self.config.write();
            let changes = (
                config.interval_ms != new_config.interval_ms,
                config.enabled != new_config.enabled,
            );
            *config = new_config;
            changes
        };

        let enabled = self.config.read().enabled;
        if enabled_changed {
            if enabled {
                self.start();
            } else {
                self.stop().await;
            }
        } else if interval_changed && self.is_scheduled() {
            self.stop().await;
            self.start();
        }
    }

    /// Run one cycle now, outside the schedule
    pub async fn force_sync(&self) -> SyncStats {
        info!("[SYNC] Forced sync requested");
        self.perform_sync().await
    }

    pub fn stats(&self) -> SyncStats {
        let mut stats = self.stats.read().clone();
        stats.is_running = self.is_running();
        stats
    }

    pub fn clear_stats(&self) {
        *self.stats.write() = SyncStats::default();
    }

    /// Run one sync cycle. If a cycle is already running, returns the current
    /// stats without calling upstream.
    #[instrument(skip(self))]
    pub async fn perform_sync(&self) -> SyncStats {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            debug!("[SYNC] Cycle already running, skipping");
            return self.stats();
        };

        let config = self.config();
        let started = Instant::now();
        let mut volumes: Vec<VolumeData> = Vec::new();
        let mut users: Vec<UserMetrics> = Vec::new();
        let mut failures = 0usize;

        for protocol in &config.protocols {
            match self.sync_protocol(protocol, &config).await {
                Ok((volume, user_metrics)) => {
                    volumes.push(volume);
                    users.extend(user_metrics);
                }
                Err(e) => {
                    warn!("[SYNC] {} failed: {}", protocol, e);
                    failures += 1;
                    self.record_error(protocol, &e.to_string());
                }
            }
        }

        let protocols_updated = volumes.len() as u32;

        if config.enable_aggregated_metrics && !volumes.is_empty() {
            let totals = AggregatedMetrics::from_parts(&config.chain, &volumes, &users);
            if let Err(e) = self.cache.set_aggregated_metrics(&totals) {
                warn!("[SYNC] Failed to store aggregated metrics: {}", e);
                failures += 1;
                self.record_error("aggregated", &e.to_string());
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        {
            let mut stats = self.stats.write();
            stats.last_sync_at = Some(Utc::now());
            stats.protocols_updated = protocols_updated;
            if failures == 0 {
                stats.successful_syncs += 1;
            } else {
                stats.failed_syncs += 1;
            }
            let completed = stats.successful_syncs + stats.failed_syncs;
            stats.avg_sync_time_ms = if completed == 1 {
                elapsed_ms
            } else {
                stats.avg_sync_time_ms * (1.0 - EMA_ALPHA) + elapsed_ms * EMA_ALPHA
            };
        }

        info!(
            "[SYNC] Cycle finished in {:.0}ms: {} protocols updated, {} failures",
            elapsed_ms, protocols_updated, failures
        );
        self.stats()
    }

    /// Fetch and store one protocol, retrying with a fixed delay
    async fn sync_protocol(
        &self,
        protocol: &str,
        config: &SyncConfig,
    ) -> Result<(VolumeData, Option<UserMetrics>), SyncFailure> {
        let attempts = config.retry_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_and_store(protocol).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    debug!(
                        "[SYNC] {} attempt {}/{} failed ({}), retrying in {:?}",
                        protocol,
                        attempt,
                        attempts,
                        e,
                        config.retry_delay()
                    );
                    tokio::time::sleep(config.retry_delay()).await;
                }
            }
        }
    }

    async fn fetch_and_store(
        &self,
        protocol: &str,
    ) -> Result<(VolumeData, Option<UserMetrics>), SyncFailure> {
        let volume = tokio::time::timeout(UPSTREAM_TIMEOUT, self.source.volume(protocol))
            .await
            .unwrap_or(Err(YieldError::Timeout(UPSTREAM_TIMEOUT.as_millis() as u64)))?;
        let user_metrics = if self.source.tracks_users() {
            tokio::time::timeout(UPSTREAM_TIMEOUT, self.source.user_metrics(protocol))
                .await
                .unwrap_or(Err(YieldError::Timeout(UPSTREAM_TIMEOUT.as_millis() as u64)))?
        } else {
            None
        };

        self.cache.set_volume(&volume)?;
        if let Some(metrics) = &user_metrics {
            self.cache.set_user_metrics(metrics)?;
        }

        Ok((volume, user_metrics))
    }

    fn record_error(&self, protocol: &str, message: &str) {
        let mut stats = self.stats.write();
        stats.errors.push(SyncErrorRecord {
            protocol: protocol.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        if stats.errors.len() > MAX_ERROR_LOG {
            let excess = stats.errors.len() - MAX_ERROR_LOG;
            stats.errors.drain(..excess);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SyncFailure {
    #[error("upstream: {0}")]
    Source(#[from] YieldError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::CacheConfig;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;
    use yield_core::YieldResult;

    struct MockMetrics {
        calls: AtomicU32,
        user_calls: AtomicU32,
        failing: Vec<&'static str>,
        delay: Duration,
        users: bool,
    }

    impl MockMetrics {
        fn new(failing: Vec<&'static str>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                user_calls: AtomicU32::new(0),
                failing,
                delay,
                users: false,
            })
        }

        fn with_users() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                user_calls: AtomicU32::new(0),
                failing: vec![],
                delay: Duration::ZERO,
                users: true,
            })
        }
    }

    #[async_trait]
    impl ProtocolMetricsSource for MockMetrics {
        async fn volume(&self, protocol: &str) -> YieldResult<VolumeData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.failing.contains(&protocol) {
                return Err(YieldError::network("upstream down"));
            }
            Ok(VolumeData {
                protocol: protocol.to_string(),
                pool: None,
                volume_24h: dec!(100),
                volume_7d: dec!(700),
                volume_30d: dec!(3000),
                concentration_risk: 0.5,
                timestamp: Utc::now(),
            })
        }

        fn tracks_users(&self) -> bool {
            self.users
        }

        async fn user_metrics(&self, protocol: &str) -> YieldResult<Option<UserMetrics>> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(UserMetrics {
                protocol: protocol.to_string(),
                unique_users_24h: 10,
                unique_users_7d: 40,
                unique_users_30d: 90,
                active_wallets: 10,
                new_users: 3,
                user_retention: 0.5,
                timestamp: Utc::now(),
            }))
        }
    }

    fn scheduler(source: Arc<MockMetrics>, config: SyncConfig) -> Arc<BackgroundSyncScheduler> {
        let cache = Arc::new(CacheStore::new_in_memory(CacheConfig::default()).unwrap());
        Arc::new(BackgroundSyncScheduler::new(source, cache, config))
    }

    fn config(protocols: &[&str]) -> SyncConfig {
        SyncConfig {
            protocols: protocols.iter().map(|p| p.to_string()).collect(),
            retry_attempts: 2,
            retry_delay_ms: 1_000,
            ..SyncConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_stores_metrics_and_totals() {
        let source = MockMetrics::new(vec![], Duration::ZERO);
        let scheduler = scheduler(source, config(&["uniswap-v3", "curve-dex"]));

        let stats = scheduler.perform_sync().await;
        assert_eq!(stats.successful_syncs, 1);
        assert_eq!(stats.protocols_updated, 2);
        assert!(stats.errors.is_empty());

        assert!(scheduler.cache.get_volume("curve-dex", None).unwrap().is_some());
        let totals = scheduler.cache.get_aggregated_metrics("all").unwrap().unwrap();
        assert_eq!(totals.total_volume_24h, dec!(200));
        assert_eq!(totals.protocol_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_step_follows_source_capability() {
        let volume_only = MockMetrics::new(vec![], Duration::ZERO);
        let scheduler_a = scheduler(volume_only.clone(), config(&["curve-dex"]));
        scheduler_a.perform_sync().await;
        assert_eq!(volume_only.user_calls.load(Ordering::SeqCst), 0);
        assert!(scheduler_a.cache.get_user_metrics("curve-dex").unwrap().is_none());

        let with_users = MockMetrics::with_users();
        let scheduler_b = scheduler(with_users.clone(), config(&["curve-dex", "aave-v3"]));
        let stats = scheduler_b.perform_sync().await;
        assert_eq!(stats.protocols_updated, 2);
        assert_eq!(with_users.user_calls.load(Ordering::SeqCst), 2);

        let stored = scheduler_b.cache.get_user_metrics("aave-v3").unwrap().unwrap();
        assert_eq!(stored.unique_users_7d, 40);
        let totals = scheduler_b.cache.get_aggregated_metrics("all").unwrap().unwrap();
        assert_eq!(totals.total_users_30d, 180);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_protocol_is_recorded_and_loop_continues() {
        let source = MockMetrics::new(vec!["broken"], Duration::ZERO);
        let scheduler = scheduler(source.clone(), config(&["broken", "curve-dex"]));

        let stats = scheduler.perform_sync().await;
        assert_eq!(stats.failed_syncs, 1);
        assert_eq!(stats.protocols_updated, 1);
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].protocol, "broken");
        // two attempts for "broken", one for "curve-dex"
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sync_is_skipped() {
        let source = MockMetrics::new(vec![], Duration::from_secs(5));
        let scheduler = scheduler(source.clone(), config(&["uniswap-v3"]));

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.perform_sync().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.is_running());

        let skipped = scheduler.perform_sync().await;
        assert!(skipped.is_running);
        assert_eq!(skipped.successful_syncs, 0);

        let finished = first.await.unwrap();
        assert_eq!(finished.successful_syncs, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_moving_average_seeded_by_first_sample() {
        let source = MockMetrics::new(vec![], Duration::from_millis(100));
        let scheduler = scheduler(source, config(&["uniswap-v3"]));

        let first = scheduler.perform_sync().await;
        assert!((first.avg_sync_time_ms - 100.0).abs() < 1.0);

        let second = scheduler.perform_sync().await;
        assert!((second.avg_sync_time_ms - 100.0).abs() < 1.0);

        scheduler.clear_stats();
        assert_eq!(scheduler.stats(), SyncStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_and_update_config_toggles() {
        let source = MockMetrics::new(vec![], Duration::ZERO);
        let mut cfg = config(&["uniswap-v3"]);
        cfg.interval_ms = 60_000;
        let scheduler = scheduler(source.clone(), cfg.clone());

        scheduler.start();
        assert!(scheduler.is_scheduled());
        tokio::time::sleep(Duration::from_millis(121_000)).await;
        assert_eq!(scheduler.stats().successful_syncs, 2);

        cfg.enabled = false;
        scheduler.update_config(cfg.clone()).await;
        assert!(!scheduler.is_scheduled());

        cfg.enabled = true;
        cfg.interval_ms = 10_000;
        scheduler.update_config(cfg).await;
        assert!(scheduler.is_scheduled());
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(scheduler.stats().successful_syncs, 3);

        scheduler.stop().await;
        assert!(!scheduler.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_scheduler_does_not_start() {
        let source = MockMetrics::new(vec![], Duration::ZERO);
        let scheduler = scheduler(
            source,
            SyncConfig {
                enabled: false,
                ..SyncConfig::default()
            },
        );
        scheduler.start();
        assert!(!scheduler.is_scheduled());
    }
}
