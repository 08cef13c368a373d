//! Quantitative risk and performance calculations
//!
//! Pure functions over `f64` return series. Degenerate inputs (too few
//! samples, zero variance) yield `0.0` rather than NaN or an error.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Daily step used by the Monte-Carlo simulation, in years
const DT: f64 = 1.0 / 365.0;

/// Period-over-period simple returns of a value series
pub fn calculate_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { (w[1] - w[0]) / w[0] })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample (n - 1) standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Annualized volatility of a return series
pub fn volatility(returns: &[f64], periods_per_year: f64) -> f64 {
    std_dev(returns) * periods_per_year.max(0.0).sqrt()
}

/// `mean(excess) * sqrt(periods_per_year) / std(excess)`, where excess
/// subtracts a per-period risk-free rate
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free_rate).collect();
    let sd = std_dev(&excess);
    if sd == 0.0 {
        return 0.0;
    }
    mean(&excess) * periods_per_year.max(0.0).sqrt() / sd
}

/// Like Sharpe, but only returns below `target` contribute to the denominator
pub fn sortino_ratio(returns: &[f64], target: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - target).collect();
    let downside: Vec<f64> = excess.iter().copied().filter(|r| *r < 0.0).collect();
    let sd = std_dev(&downside);
    if sd == 0.0 {
        return 0.0;
    }
    mean(&excess) * periods_per_year.max(0.0).sqrt() / sd
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Value at index `floor(p * n)` of an ascending series, clamped to the end
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((p * sorted.len() as f64).floor().max(0.0) as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Historical VaR: the return at `floor((1 - confidence) * n)` of the sorted
/// series, scaled by `sqrt(time_horizon)`. Losses come out negative.
pub fn value_at_risk(returns: &[f64], confidence: f64, time_horizon: f64) -> f64 {
    quantile_sorted(&sorted(returns), 1.0 - confidence) * time_horizon.max(0.0).sqrt()
}

/// Mean of the returns at or below the one-period VaR, scaled like VaR
pub fn expected_shortfall(returns: &[f64], confidence: f64, time_horizon: f64) -> f64 {
    let var = value_at_risk(returns, confidence, 1.0);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    mean(&tail) * time_horizon.max(0.0).sqrt()
}

/// Worst peak-to-trough decline of a value series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Drawdown {
    /// Depth as a fraction of the peak (0.25 = 25% below peak)
    pub max_drawdown: f64,
    pub peak_index: usize,
    pub trough_index: usize,
    /// First index back at or above the peak, if the series recovered
    pub recovery_index: Option<usize>,
    /// Periods from the peak until recovery, or until the end of the series
    pub duration: usize,
}

pub fn max_drawdown(values: &[f64]) -> Drawdown {
    let mut worst = Drawdown::default();
    let Some(&first) = values.first() else {
        return worst;
    };

    let mut peak = first;
    let mut peak_index = 0;

    for (i, &value) in values.iter().enumerate() {
        if value > peak {
            peak = value;
            peak_index = i;
        } else if peak > 0.0 {
            let depth = (peak - value) / peak;
            if depth > worst.max_drawdown {
                worst.max_drawdown = depth;
                worst.peak_index = peak_index;
                worst.trough_index = i;
            }
        }
    }

    if worst.max_drawdown > 0.0 {
        let peak_value = values[worst.peak_index];
        worst.recovery_index = values
            .iter()
            .enumerate()
            .skip(worst.trough_index + 1)
            .find(|(_, v)| **v >= peak_value)
            .map(|(i, _)| i);
        worst.duration = worst.recovery_index.unwrap_or(values.len() - 1) - worst.peak_index;
    }

    worst
}

fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (n - 1) as f64
}

/// `cov(asset, market) / var(market)` over the paired prefix of both series
pub fn beta(asset_returns: &[f64], market_returns: &[f64]) -> f64 {
    let n = asset_returns.len().min(market_returns.len());
    let market_variance = std_dev(&market_returns[..n]).powi(2);
    if market_variance == 0.0 {
        return 0.0;
    }
    covariance(asset_returns, market_returns) / market_variance
}

/// Pearson correlation over the paired prefix of both series
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let denominator = std_dev(&a[..n]) * std_dev(&b[..n]);
    if denominator == 0.0 {
        return 0.0;
    }
    covariance(a, b) / denominator
}

// ============================================================================
// Monte-Carlo
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub initial_value: f64,
    /// Annualized drift
    pub expected_return: f64,
    /// Annualized volatility
    pub volatility: f64,
    pub days: u32,
    pub simulations: u32,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            initial_value: 1.0,
            expected_return: 0.08,
            volatility: 0.2,
            days: 30,
            simulations: 10_000,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    /// Simulated total returns, ascending
    pub returns: Vec<f64>,
    pub percentiles: Percentiles,
    pub mean_return: f64,
    /// Share of paths ending below the initial value
    pub probability_of_loss: f64,
    /// Average size of the losing returns, as a positive number
    pub expected_loss: f64,
    /// CVaR(95) / VaR(95); how much worse the tail is than its edge
    pub tail_risk_ratio: f64,
}

/// Standard normal sample via the Box-Muller transform
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // 1 - u keeps the log argument in (0, 1]
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Simulate geometric Brownian motion paths with daily steps
pub fn monte_carlo(config: &MonteCarloConfig) -> MonteCarloResult {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let drift = (config.expected_return - 0.5 * config.volatility.powi(2)) * DT;
    let shock_scale = config.volatility * DT.sqrt();
    let initial = if config.initial_value > 0.0 {
        config.initial_value
    } else {
        1.0
    };

    let mut returns: Vec<f64> = (0..config.simulations.max(1))
        .map(|_| {
            let mut value = initial;
            for _ in 0..config.days {
                value *= (drift + shock_scale * standard_normal(&mut rng)).exp();
            }
            value / initial - 1.0
        })
        .collect();
    returns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let percentiles = Percentiles {
        p5: quantile_sorted(&returns, 0.05),
        p10: quantile_sorted(&returns, 0.10),
        p25: quantile_sorted(&returns, 0.25),
        p50: quantile_sorted(&returns, 0.50),
        p75: quantile_sorted(&returns, 0.75),
        p90: quantile_sorted(&returns, 0.90),
        p95: quantile_sorted(&returns, 0.95),
        p99: quantile_sorted(&returns, 0.99),
    };

    let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let probability_of_loss = losses.len() as f64 / returns.len() as f64;
    let expected_loss = -mean(&losses);

    let var95 = percentiles.p5;
    let cvar95 = mean(
        &returns
            .iter()
            .copied()
            .filter(|r| *r <= var95)
            .collect::<Vec<_>>(),
    );
    let tail_risk_ratio = if var95 < 0.0 { cvar95 / var95 } else { 0.0 };

    MonteCarloResult {
        mean_return: mean(&returns),
        percentiles,
        probability_of_loss,
        expected_loss,
        tail_risk_ratio,
        returns,
    }
}
