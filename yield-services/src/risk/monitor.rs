//! Risk Monitor
//!
//! Evaluates system signals against configured thresholds and keeps an
//! in-memory list of alerts. Alerts are acknowledged, never deleted; they
//! drop out only once acknowledged and older than the retention window.

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::periodic::RunGuard;
use crate::risk::scoring::RiskWeights;

/// Signal names understood by [`SystemSignals::metric`]
pub const METRIC_RISK_SCORE: &str = "risk_score";
pub const METRIC_ADAPTER_HEALTH: &str = "adapter_health";
pub const METRIC_DATA_QUALITY: &str = "data_quality";
pub const METRIC_RESPONSE_TIME: &str = "response_time_ms";

/// Notification channel that writes alerts to the tracing log
pub const CHANNEL_LOG: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    ThresholdBreach,
    Spike,
    SourceDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub metric: String,
    pub current_value: f64,
    pub threshold: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Channels the alert was delivered to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notified_channels: Vec<String>,
}

/// Which side of the levels is bad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Alert when the value rises to the level or beyond
    #[default]
    Above,
    /// Alert when the value falls to the level or below
    Below,
}

fn default_lookback_secs() -> u64 {
    24 * 60 * 60
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThreshold {
    pub metric: String,
    pub warning_level: f64,
    pub critical_level: f64,
    #[serde(default)]
    pub direction: ThresholdDirection,
    /// A repeat breach re-alerts once the unacknowledged alert for it is older than this
    #[serde(default = "default_lookback_secs")]
    pub lookback_window_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Where new alerts for this metric are delivered; `"log"` is the only channel
    #[serde(default)]
    pub notification_channels: Vec<String>,
}

impl RiskThreshold {
    pub fn above(metric: &str, warning_level: f64, critical_level: f64) -> Self {
        Self {
            metric: metric.to_string(),
            warning_level,
            critical_level,
            direction: ThresholdDirection::Above,
            lookback_window_secs: default_lookback_secs(),
            enabled: true,
            notification_channels: vec![CHANNEL_LOG.to_string()],
        }
    }

    pub fn below(metric: &str, warning_level: f64, critical_level: f64) -> Self {
        Self {
            direction: ThresholdDirection::Below,
            ..Self::above(metric, warning_level, critical_level)
        }
    }

    /// Severity reached by `value`, with the level it crossed
    fn classify(&self, value: f64) -> Option<(AlertSeverity, f64)> {
        let crossed = |level: f64| match self.direction {
            ThresholdDirection::Above => value >= level,
            ThresholdDirection::Below => value <= level,
        };

        if crossed(self.critical_level) {
            Some((AlertSeverity::Critical, self.critical_level))
        } else if crossed(self.warning_level) {
            Some((AlertSeverity::Warning, self.warning_level))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskMonitorConfig {
    pub thresholds: Vec<RiskThreshold>,
    pub check_interval_ms: u64,
    /// Change in risk score between evaluations that counts as a spike
    pub spike_delta: f64,
    /// Acknowledged alerts older than this are pruned
    pub alert_retention_secs: u64,
    pub weights: RiskWeights,
}

impl Default for RiskMonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![
                RiskThreshold::above(METRIC_RISK_SCORE, 50.0, 75.0),
                RiskThreshold::below(METRIC_ADAPTER_HEALTH, 80.0, 50.0),
                RiskThreshold::below(METRIC_DATA_QUALITY, 90.0, 70.0),
                RiskThreshold::above(METRIC_RESPONSE_TIME, 2_000.0, 5_000.0),
            ],
            check_interval_ms: 60_000,
            spike_delta: 15.0,
            alert_retention_secs: 7 * 24 * 60 * 60,
            weights: RiskWeights::default(),
        }
    }
}

impl RiskMonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}

/// Inputs to one evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemSignals {
    /// Percentage (0 - 100) of sources currently healthy
    pub adapter_health_pct: f64,
    /// Percentage (0 - 100) of opportunities passing sanity checks
    pub data_quality_pct: f64,
    pub avg_response_time_ms: f64,
    /// Portfolio risk score (0 - 100)
    pub risk_score: f64,
    pub sources_down: Vec<String>,
}

impl SystemSignals {
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            METRIC_RISK_SCORE => Some(self.risk_score),
            METRIC_ADAPTER_HEALTH => Some(self.adapter_health_pct),
            METRIC_DATA_QUALITY => Some(self.data_quality_pct),
            METRIC_RESPONSE_TIME => Some(self.avg_response_time_ms),
            _ => None,
        }
    }
}

/// Threshold evaluator and alert store
pub struct RiskMonitor {
    config: RiskMonitorConfig,
    alerts: RwLock<Vec<RiskAlert>>,
    last_risk_score: Mutex<Option<f64>>,
    evaluating: AtomicBool,
}

impl RiskMonitor {
    pub fn new(config: RiskMonitorConfig) -> Self {
        Self {
            config,
            alerts: RwLock::new(Vec::new()),
            last_risk_score: Mutex::new(None),
            evaluating: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RiskMonitorConfig {
        &self.config
    }

    /// Collect signals and evaluate them, unless an evaluation is already in
    /// progress, in which case `None` is returned without collecting.
    pub async fn check<Fut>(&self, collect: Fut) -> Option<Vec<RiskAlert>>
    where
        Fut: Future<Output = SystemSignals>,
    {
        let Some(_guard) = RunGuard::try_acquire(&self.evaluating) else {
            debug!("[RISK] Evaluation already in progress, skipping");
            return None;
        };

        let signals = collect.await;
        Some(self.evaluate(&signals))
    }

    /// Evaluate one set of signals. Returns the alerts raised by this call.
    pub fn evaluate(&self, signals: &SystemSignals) -> Vec<RiskAlert> {
        let mut raised = Vec::new();

        for threshold in self.config.thresholds.iter().filter(|t| t.enabled) {
            let Some(value) = signals.metric(&threshold.metric) else {
                debug!("[RISK] No signal for metric {}", threshold.metric);
                continue;
            };

            if let Some((severity, level)) = threshold.classify(value) {
                let comparison = match threshold.direction {
                    ThresholdDirection::Above => "above",
                    ThresholdDirection::Below => "below",
                };
                raised.push(new_alert(
                    AlertType::ThresholdBreach,
                    severity,
                    &threshold.metric,
                    value,
                    level,
                    format!(
                        "{} is {:.2}, {} the {} level {:.2}",
                        threshold.metric, value, comparison, severity, level
                    ),
                ));
            }
        }

        {
            let mut last = self.last_risk_score.lock();
            if let Some(previous) = *last {
                let delta = (signals.risk_score - previous).abs();
                if delta >= self.config.spike_delta {
                    let severity = if delta >= self.config.spike_delta * 2.0 {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };
                    raised.push(new_alert(
                        AlertType::Spike,
                        severity,
                        METRIC_RISK_SCORE,
                        signals.risk_score,
                        self.config.spike_delta,
                        format!(
                            "Risk score moved {:.2} points ({:.2} -> {:.2})",
                            delta, previous, signals.risk_score
                        ),
                    ));
                }
            }
            *last = Some(signals.risk_score);
        }

        for source in &signals.sources_down {
            raised.push(new_alert(
                AlertType::SourceDown,
                AlertSeverity::Critical,
                &format!("source:{}", source),
                0.0,
                0.0,
                format!("Source {} is down", source),
            ));
        }

        let now = Utc::now();
        let mut alerts = self.alerts.write();
        self.prune(&mut alerts);

        // Suppress while an unacknowledged alert for the same metric, type and
        // severity exists within the metric's lookback window
        let mut fresh: Vec<RiskAlert> = raised
            .into_iter()
            .filter(|candidate| {
                let window_start = self.window_start(&candidate.metric, now);
                !alerts.iter().any(|a| {
                    !a.acknowledged
                        && a.metric == candidate.metric
                        && a.alert_type == candidate.alert_type
                        && a.severity == candidate.severity
                        && window_start.map_or(true, |start| a.timestamp >= start)
                })
            })
            .collect();

        for alert in &mut fresh {
            self.notify(alert);
        }

        alerts.extend(fresh.iter().cloned());
        fresh
    }

    fn threshold_for(&self, metric: &str) -> Option<&RiskThreshold> {
        self.config.thresholds.iter().find(|t| t.metric == metric)
    }

    /// Oldest alert time that still suppresses a repeat of `metric`
    fn window_start(&self, metric: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = self
            .threshold_for(metric)
            .map_or_else(default_lookback_secs, |t| t.lookback_window_secs);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window))
    }

    /// Deliver a new alert to its threshold's channels. Alerts without a
    /// threshold (spikes, downed sources) always go to the log.
    fn notify(&self, alert: &mut RiskAlert) {
        let channels = match self.threshold_for(&alert.metric) {
            Some(threshold) if alert.alert_type == AlertType::ThresholdBreach => {
                threshold.notification_channels.clone()
            }
            _ => vec![CHANNEL_LOG.to_string()],
        };

        for channel in &channels {
            match channel.as_str() {
                CHANNEL_LOG => {
                    match alert.severity {
                        AlertSeverity::Critical => warn!("[RISK] {}", alert.message),
                        _ => info!("[RISK] {}", alert.message),
                    }
                    alert.notified_channels.push(channel.clone());
                }
                other => debug!("[RISK] Unsupported notification channel {}", other),
            }
        }
    }

    fn prune(&self, alerts: &mut Vec<RiskAlert>) {
        let Some(cutoff) = i64::try_from(self.config.alert_retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return;
        };
        let before = alerts.len();
        alerts.retain(|a| !(a.acknowledged && a.timestamp < cutoff));
        if alerts.len() < before {
            debug!("[RISK] Pruned {} expired alerts", before - alerts.len());
        }
    }

    /// Unacknowledged alerts, newest first
    pub fn active_alerts(&self) -> Vec<RiskAlert> {
        let mut active: Vec<RiskAlert> = self
            .alerts
            .read()
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        active
    }

    pub fn all_alerts(&self) -> Vec<RiskAlert> {
        self.alerts.read().clone()
    }

    /// Mark an alert acknowledged. Returns false for unknown ids.
    pub fn acknowledge(&self, id: &str) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                if !alert.acknowledged {
                    alert.acknowledged = true;
                    alert.acknowledged_at = Some(Utc::now());
                    info!("[RISK] Alert {} acknowledged", id);
                }
                true
            }
            None => false,
        }
    }
}

fn new_alert(
    alert_type: AlertType,
    severity: AlertSeverity,
    metric: &str,
    current_value: f64,
    threshold: f64,
    message: String,
) -> RiskAlert {
    RiskAlert {
        id: Uuid::new_v4().to_string(),
        alert_type,
        severity,
        metric: metric.to_string(),
        current_value,
        threshold,
        message,
        timestamp: Utc::now(),
        acknowledged: false,
        acknowledged_at: None,
        notified_channels: Vec::new(),
    }
}
