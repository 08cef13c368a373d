//! Service layer for the DeFi yield engine
//!
//! This crate holds the stateful parts of the engine: the SQLite-backed
//! cache, the aggregation manager that merges source results, the
//! reliability coordinator guarding every source, the background metrics
//! sync, and the risk analytics and alerting. [`YieldEngine`] ties them
//! together.

pub mod aggregation;
pub mod cache_store;
pub mod config;
pub mod engine;
pub mod periodic;
pub mod reliability;
pub mod risk;
pub mod sync_scheduler;

pub use aggregation::{AdapterStats, AggregationError, AggregationManager};
pub use cache_store::{CacheConfig, CacheEntryInfo, CacheError, CacheStats, CacheStore};
pub use config::{ConfigError, EngineConfig, SourcesConfig};
pub use engine::{EngineError, OpportunityDetail, ProtocolMetrics, YieldEngine};
pub use periodic::PeriodicTask;
pub use reliability::{
    AdapterHealth, AggregationMethod, CircuitBreakerConfig, GuardedAdapter, HealthStatus,
    ReliabilityConfig, ReliabilityCoordinator, ReliabilityError, StrategyOutcome, SystemHealth,
};
pub use risk::{
    AlertSeverity, AlertType, OpportunityRiskAnalyzer, PortfolioRisk, RiskAlert, RiskAssessment,
    RiskLevel, RiskMonitor, RiskMonitorConfig, RiskThreshold, RiskWeights, SystemSignals,
};
pub use sync_scheduler::{BackgroundSyncScheduler, SyncConfig, SyncStats};
