//! DefiLlama integration for the DeFi yield engine
//!
//! This crate provides a client for the public DefiLlama yields and protocol
//! APIs (no authentication required) and the source adapters built on it:
//! one [`LlamaProtocolAdapter`] per tracked protocol, all sharing a single
//! rate-limited [`LlamaYieldsClient`].

pub mod adapter;
pub mod client;
pub mod metrics;
pub mod rate_limiter;
pub mod types;

pub use adapter::{LlamaProtocolAdapter, SOURCE_NAME};
pub use client::LlamaYieldsClient;
pub use metrics::LlamaMetricsClient;
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use types::{DexSummary, LlamaChartPoint, LlamaPool};
