//! Governor configuration.

use replaygate_types::{PayloadCategory, PayloadType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Metric the governor steers submission by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalMetric {
    /// No goal; only pauses and throttles apply.
    #[default]
    Unlimited,
    /// Bytes submitted per second by this node.
    BytesPerSec,
    /// Transactions submitted per second by this node.
    TransactionsPerSec,
    /// Consensus events per second across the network.
    EventsPerSec,
    /// Consensus rounds per second across the network.
    RoundsPerSec,
    /// Average transactions carried per consensus event.
    TransactionsPerEvent,
    /// Consensus-to-consensus latency, in seconds.
    C2cLatency,
}

/// How a goal compares the live value against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalSense {
    /// Submit while the value is below the threshold.
    Below,
    /// Submit while the value is at or above the threshold.
    AtLeast,
}

impl GoalSense {
    /// Whether `value` permits another submission.
    pub fn allows(self, value: f64, threshold: f64) -> bool {
        match self {
            GoalSense::Below => value < threshold,
            GoalSense::AtLeast => value >= threshold,
        }
    }
}

impl GoalMetric {
    /// Comparison sense of this metric.
    ///
    /// Rounds per second falls as load rises, so it is a floor. Every other
    /// metric rises with load and is a ceiling.
    pub fn sense(self) -> GoalSense {
        match self {
            GoalMetric::RoundsPerSec => GoalSense::AtLeast,
            _ => GoalSense::Below,
        }
    }
}

/// A goal metric with its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SubmitGoal {
    pub metric: GoalMetric,
    #[serde(default)]
    pub threshold: f64,
}

impl SubmitGoal {
    /// No goal.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn bytes_per_sec(threshold: f64) -> Self {
        Self {
            metric: GoalMetric::BytesPerSec,
            threshold,
        }
    }

    pub fn transactions_per_sec(threshold: f64) -> Self {
        Self {
            metric: GoalMetric::TransactionsPerSec,
            threshold,
        }
    }

    /// Goal on an arbitrary metric.
    pub fn new(metric: GoalMetric, threshold: f64) -> Self {
        Self { metric, threshold }
    }
}

/// Pause submission for a while after a number of transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseAfter {
    /// Transactions submitted before the pause starts.
    pub transactions: u64,
    /// Length of the pause in seconds.
    pub pause_secs: u64,
}

impl PauseAfter {
    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

/// Token-bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Tokens added per second.
    pub per_sec: u32,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimit {
    pub fn new(per_sec: u32, burst: u32) -> Self {
        Self { per_sec, burst }
    }
}

/// Per-type and per-category submission throttles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ThrottleConfig {
    #[serde(default)]
    pub per_type: BTreeMap<PayloadType, RateLimit>,
    #[serde(default)]
    pub per_category: BTreeMap<PayloadCategory, RateLimit>,
}

impl ThrottleConfig {
    /// Throttle one payload type.
    pub fn with_type_limit(mut self, payload_type: PayloadType, limit: RateLimit) -> Self {
        self.per_type.insert(payload_type, limit);
        self
    }

    /// Throttle every payload type in a category.
    pub fn with_category_limit(mut self, category: PayloadCategory, limit: RateLimit) -> Self {
        self.per_category.insert(category, limit);
        self
    }

    /// Check if no throttle is configured.
    pub fn is_empty(&self) -> bool {
        self.per_type.is_empty() && self.per_category.is_empty()
    }
}

/// Configuration for [`crate::SubmissionGovernor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub goal: SubmitGoal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_after: Option<PauseAfter>,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Local rates are averaged over at least this window, so a burst at
    /// the start of a cycle is measured against a full window.
    #[serde(default = "default_min_window_ms")]
    pub min_window_ms: u64,
}

fn default_min_window_ms() -> u64 {
    1_000
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            goal: SubmitGoal::unlimited(),
            pause_after: None,
            throttle: ThrottleConfig::default(),
            min_window_ms: default_min_window_ms(),
        }
    }
}

impl GovernorConfig {
    pub fn with_goal(mut self, goal: SubmitGoal) -> Self {
        self.goal = goal;
        self
    }

    pub fn with_pause_after(mut self, transactions: u64, pause: Duration) -> Self {
        self.pause_after = Some(PauseAfter {
            transactions,
            pause_secs: pause.as_secs(),
        });
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    /// Minimum averaging window.
    pub fn min_window(&self) -> Duration {
        Duration::from_millis(self.min_window_ms)
    }

    /// Reject settings the governor cannot honour.
    pub fn validate(&self) -> Result<(), GovernorConfigError> {
        if self.goal.metric != GoalMetric::Unlimited
            && !(self.goal.threshold.is_finite() && self.goal.threshold > 0.0)
        {
            return Err(GovernorConfigError::InvalidThreshold {
                metric: self.goal.metric,
                threshold: self.goal.threshold,
            });
        }
        if self.min_window_ms == 0 {
            return Err(GovernorConfigError::ZeroWindow);
        }
        if let Some(pause) = self.pause_after {
            if pause.transactions == 0 {
                return Err(GovernorConfigError::ZeroPauseAfter);
            }
        }
        let limits = self
            .throttle
            .per_type
            .iter()
            .map(|(t, l)| (t.to_string(), l))
            .chain(
                self.throttle
                    .per_category
                    .iter()
                    .map(|(c, l)| (c.to_string(), l)),
            );
        for (name, limit) in limits {
            if limit.per_sec == 0 || limit.burst == 0 {
                return Err(GovernorConfigError::InvalidRateLimit(name));
            }
        }
        Ok(())
    }
}

/// Governor configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GovernorConfigError {
    #[error("goal {metric:?} needs a positive finite threshold, got {threshold}")]
    InvalidThreshold { metric: GoalMetric, threshold: f64 },

    #[error("minimum measurement window must be non-zero")]
    ZeroWindow,

    #[error("pause_after.transactions must be non-zero")]
    ZeroPauseAfter,

    #[error("rate limit for {0} must have non-zero rate and burst")]
    InvalidRateLimit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_senses() {
        assert!(GoalMetric::BytesPerSec.sense().allows(999.0, 1000.0));
        assert!(!GoalMetric::BytesPerSec.sense().allows(1000.0, 1000.0));
        assert!(GoalMetric::RoundsPerSec.sense().allows(5.0, 5.0));
        assert!(!GoalMetric::RoundsPerSec.sense().allows(4.0, 5.0));
        assert!(!GoalMetric::C2cLatency.sense().allows(3.0, 2.5));
    }

    #[test]
    fn test_validate() {
        assert!(GovernorConfig::default().validate().is_ok());

        let bad_goal = GovernorConfig::default().with_goal(SubmitGoal::bytes_per_sec(0.0));
        assert!(matches!(
            bad_goal.validate(),
            Err(GovernorConfigError::InvalidThreshold { .. })
        ));

        let bad_limit = GovernorConfig::default().with_throttle(
            ThrottleConfig::default().with_category_limit(PayloadCategory::Tree, RateLimit::new(0, 5)),
        );
        assert_eq!(
            bad_limit.validate(),
            Err(GovernorConfigError::InvalidRateLimit("tree".to_string()))
        );
    }

    #[test]
    fn test_config_from_toml() {
        let config: GovernorConfig = toml::from_str(
            r#"
            goal = { metric = "bytes_per_sec", threshold = 5000.0 }
            pause_after = { transactions = 100, pause_secs = 3 }

            [throttle.per_type]
            ENTITY_CREATE = { per_sec = 10, burst = 2 }

            [throttle.per_category]
            tree = { per_sec = 50, burst = 50 }
            "#,
        )
        .unwrap();

        assert_eq!(config.goal, SubmitGoal::bytes_per_sec(5000.0));
        assert_eq!(config.pause_after.map(|p| p.pause()), Some(Duration::from_secs(3)));
        assert_eq!(
            config.throttle.per_type.get(&PayloadType::EntityCreate),
            Some(&RateLimit::new(10, 2))
        );
        assert_eq!(config.min_window_ms, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_has_no_goal() {
        let config = GovernorConfig::default();
        assert_eq!(config.goal, SubmitGoal::unlimited());
        assert_eq!(config.goal.metric, GoalMetric::Unlimited);
        assert!(config.validate().is_ok());
    }
}
