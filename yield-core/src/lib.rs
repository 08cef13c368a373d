//! Core types for the DeFi yield engine
//!
//! This crate defines the shared data structures used across the engine,
//! including opportunity representations, protocol metrics, and the
//! capability traits every upstream source implements.

pub mod adapter;
pub mod error;
pub mod metrics;
pub mod opportunity;
pub mod protocol;

pub use adapter::{
    classify_risk, retry_with_backoff, AuditInfo, ChartProvider, SocialMetrics, SourceAdapter,
};
pub use error::{YieldError, YieldResult};
pub use metrics::{AggregatedMetrics, ProtocolMetricsSource, UserMetrics, VolumeData};
pub use opportunity::{apy_to_apr, ChartPoint, Opportunity, OpportunityMetadata, RiskBucket};
pub use protocol::ProtocolInfo;
