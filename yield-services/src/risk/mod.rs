//! Risk & analytics
//!
//! - [`analytics`]: return-series statistics and Monte-Carlo simulation
//! - [`scoring`]: weighted category scores for opportunities and portfolios
//! - [`monitor`]: threshold evaluation and the alert list

pub mod analytics;
pub mod monitor;
pub mod scoring;

pub use analytics::{
    beta, calculate_returns, correlation, expected_shortfall, max_drawdown, monte_carlo,
    sharpe_ratio, sortino_ratio, value_at_risk, volatility, Drawdown, MonteCarloConfig,
    MonteCarloResult, Percentiles,
};
pub use monitor::{
    AlertSeverity, AlertType, RiskAlert, RiskMonitor, RiskMonitorConfig, RiskThreshold,
    SystemSignals, ThresholdDirection,
};
pub use scoring::{
    overall_score, CategoryScores, OpportunityRiskAnalyzer, PortfolioRisk, RiskAssessment,
    RiskLevel, RiskWeights,
};
