//! Weighted risk scoring for opportunities and portfolios

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use yield_core::{Opportunity, RiskBucket};

/// Per-category risk scores, each in [0, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub impermanent_loss: f64,
    pub smart_contract: f64,
    pub liquidity: f64,
    pub market: f64,
    pub protocol: f64,
}

/// Category weights; they need not sum to one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub impermanent_loss: f64,
    pub smart_contract: f64,
    pub liquidity: f64,
    pub market: f64,
    pub protocol: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            impermanent_loss: 0.10,
            smart_contract: 0.30,
            liquidity: 0.25,
            market: 0.20,
            protocol: 0.15,
        }
    }
}

impl RiskWeights {
    fn total(&self) -> f64 {
        self.impermanent_loss + self.smart_contract + self.liquidity + self.market + self.protocol
    }
}

/// Weighted average of the category scores, clamped to [0, 100]
pub fn overall_score(scores: &CategoryScores, weights: &RiskWeights) -> f64 {
    let total = weights.total();
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }

    let weighted = scores.impermanent_loss * weights.impermanent_loss
        + scores.smart_contract * weights.smart_contract
        + scores.liquidity * weights.liquidity
        + scores.market * weights.market
        + scores.protocol * weights.protocol;

    let score = weighted / total;
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score <= 25.0 {
            RiskLevel::Low
        } else if score <= 50.0 {
            RiskLevel::Medium
        } else if score <= 75.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub opportunity_id: String,
    pub categories: CategoryScores,
    pub score: f64,
    pub level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRisk {
    /// TVL-weighted score across all assessed opportunities
    pub score: f64,
    pub level: RiskLevel,
    pub assessed: usize,
    /// Riskiest opportunities, highest score first
    pub riskiest: Vec<RiskAssessment>,
}

/// How many of the riskiest opportunities a portfolio report keeps
const RISKIEST_KEPT: usize = 5;

/// Heuristic category scoring for opportunities
#[derive(Debug, Clone, Default)]
pub struct OpportunityRiskAnalyzer {
    weights: RiskWeights,
}

impl OpportunityRiskAnalyzer {
    pub fn new(weights: RiskWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RiskWeights {
        &self.weights
    }

    /// Score one opportunity. `source_uptime` is the uptime ratio (0 - 1) of
    /// the source that reported it.
    pub fn assess(&self, opportunity: &Opportunity, source_uptime: f64) -> RiskAssessment {
        let categories = CategoryScores {
            impermanent_loss: impermanent_loss_score(opportunity),
            smart_contract: smart_contract_score(opportunity),
            liquidity: liquidity_score(opportunity.tvl_usd),
            market: market_score(opportunity.apy),
            protocol: (100.0 * (1.0 - source_uptime.clamp(0.0, 1.0))).clamp(0.0, 100.0),
        };
        let score = overall_score(&categories, &self.weights);

        RiskAssessment {
            opportunity_id: opportunity.id.clone(),
            categories,
            score,
            level: RiskLevel::from_score(score),
        }
    }

    /// Assess every opportunity and combine them weighted by TVL. Falls back
    /// to a plain average when the total TVL is zero.
    pub fn assess_portfolio<F>(&self, opportunities: &[Opportunity], uptime_for: F) -> PortfolioRisk
    where
        F: Fn(&Opportunity) -> f64,
    {
        let mut assessments: Vec<(RiskAssessment, f64)> = opportunities
            .iter()
            .map(|o| {
                let tvl = o.tvl_usd.to_f64().unwrap_or(0.0).max(0.0);
                (self.assess(o, uptime_for(o)), tvl)
            })
            .collect();

        let total_tvl: f64 = assessments.iter().map(|(_, tvl)| tvl).sum();
        let score = if assessments.is_empty() {
            0.0
        } else if total_tvl > 0.0 {
            assessments.iter().map(|(a, tvl)| a.score * tvl).sum::<f64>() / total_tvl
        } else {
            assessments.iter().map(|(a, _)| a.score).sum::<f64>() / assessments.len() as f64
        };
        let score = score.clamp(0.0, 100.0);

        assessments.sort_by(|(a, _), (b, _)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        PortfolioRisk {
            score,
            level: RiskLevel::from_score(score),
            assessed: assessments.len(),
            riskiest: assessments
                .into_iter()
                .take(RISKIEST_KEPT)
                .map(|(a, _)| a)
                .collect(),
        }
    }
}

fn impermanent_loss_score(o: &Opportunity) -> f64 {
    if o.is_stablecoin() {
        return 5.0;
    }
    let il_label = o.metadata.as_ref().and_then(|m| m.il_risk.as_deref());
    match (il_label, o.tokens.len()) {
        (Some("no"), _) => 10.0,
        (Some("yes"), n) if n > 2 => 70.0,
        (Some("yes"), _) => 60.0,
        (_, 0 | 1) => 10.0,
        (_, 2) => 50.0,
        _ => 65.0,
    }
}

fn smart_contract_score(o: &Opportunity) -> f64 {
    let base: f64 = match o.risk {
        RiskBucket::Low => 20.0,
        RiskBucket::Medium => 45.0,
        RiskBucket::High => 70.0,
    };
    let multi_exposure = o
        .metadata
        .as_ref()
        .and_then(|m| m.exposure.as_deref())
        .map(|e| e.eq_ignore_ascii_case("multi"))
        .unwrap_or(false);

    if multi_exposure {
        (base + 10.0).min(100.0)
    } else {
        base
    }
}

fn liquidity_score(tvl: Decimal) -> f64 {
    if tvl >= Decimal::from(100_000_000u64) {
        10.0
    } else if tvl >= Decimal::from(10_000_000u64) {
        25.0
    } else if tvl >= Decimal::from(1_000_000u64) {
        50.0
    } else if tvl >= Decimal::from(100_000u64) {
        75.0
    } else {
        90.0
    }
}

fn market_score(apy: f64) -> f64 {
    if !apy.is_finite() {
        return 95.0;
    }
    if apy < 5.0 {
        15.0
    } else if apy < 15.0 {
        30.0
    } else if apy < 30.0 {
        55.0
    } else if apy < 100.0 {
        75.0
    } else {
        95.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use yield_core::OpportunityMetadata;

    fn opportunity(id: &str, tvl: Decimal, apy: f64, risk: RiskBucket, stable: bool) -> Opportunity {
        Opportunity {
            id: id.to_string(),
            chain: "Ethereum".to_string(),
            protocol: "aave-v3".to_string(),
            pool: id.to_string(),
            tokens: vec!["USDC".to_string(), "ETH".to_string()],
            apr: apy,
            apy,
            apy_base: None,
            apy_reward: None,
            reward_tokens: vec![],
            tvl_usd: tvl,
            risk,
            source: "mock".to_string(),
            last_updated: Utc::now(),
            metadata: Some(OpportunityMetadata {
                pool_id: None,
                exposure: Some("multi".to_string()),
                il_risk: None,
                stablecoin: stable,
            }),
        }
    }

    #[test]
    fn test_score_bounds_over_grid() {
        let weights = RiskWeights::default();
        let levels = [0.0, 12.5, 50.0, 99.0, 100.0];
        for &a in &levels {
            for &b in &levels {
                for &c in &levels {
                    let scores = CategoryScores {
                        impermanent_loss: a,
                        smart_contract: b,
                        liquidity: c,
                        market: a,
                        protocol: b,
                    };
                    let s = overall_score(&scores, &weights);
                    assert!((0.0..=100.0).contains(&s), "score {} out of bounds", s);
                }
            }
        }
    }

    #[test]
    fn test_weighted_sum_with_default_weights() {
        let scores = CategoryScores {
            impermanent_loss: 100.0,
            smart_contract: 0.0,
            liquidity: 0.0,
            market: 0.0,
            protocol: 0.0,
        };
        assert!((overall_score(&scores, &RiskWeights::default()) - 10.0).abs() < 1e-9);

        let zero = RiskWeights {
            impermanent_loss: 0.0,
            smart_contract: 0.0,
            liquidity: 0.0,
            market: 0.0,
            protocol: 0.0,
        };
        assert_eq!(overall_score(&scores, &zero), 0.0);
    }

    #[test]
    fn test_risk_level_boundaries() {
        assert_eq!(RiskLevel::from_score(25.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25.1), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(75.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75.5), RiskLevel::Critical);
    }

    #[test]
    fn test_deep_stable_pool_scores_lower_than_thin_volatile_pool() {
        let analyzer = OpportunityRiskAnalyzer::default();
        let safe = analyzer.assess(
            &opportunity("safe", dec!(500000000), 4.0, RiskBucket::Low, true),
            0.99,
        );
        let risky = analyzer.assess(
            &opportunity("risky", dec!(50000), 150.0, RiskBucket::High, false),
            0.0,
        );

        assert!(safe.score < risky.score);
        assert_eq!(safe.level, RiskLevel::Low);
        assert_eq!(risky.level, RiskLevel::Critical);
        assert_eq!(risky.categories.protocol, 100.0);
        assert_eq!(risky.categories.smart_contract, 80.0);
    }

    #[test]
    fn test_portfolio_is_tvl_weighted() {
        let analyzer = OpportunityRiskAnalyzer::default();
        let big = opportunity("big", dec!(900), 4.0, RiskBucket::Low, true);
        let small = opportunity("small", dec!(100), 150.0, RiskBucket::High, false);

        let big_score = analyzer.assess(&big, 1.0).score;
        let small_score = analyzer.assess(&small, 1.0).score;
        let portfolio = analyzer.assess_portfolio(&[big, small], |_| 1.0);

        let expected = big_score * 0.9 + small_score * 0.1;
        assert!((portfolio.score - expected).abs() < 1e-9);
        assert_eq!(portfolio.assessed, 2);
        assert_eq!(portfolio.riskiest[0].opportunity_id, "small");

        let empty = analyzer.assess_portfolio(&[], |_| 1.0);
        assert_eq!(empty.score, 0.0);
        assert_eq!(empty.level, RiskLevel::Low);
    }
}
