//! Rate limiting for repetitive error logs.

use dashmap::DashMap;
use tracing::warn;

/// Default number of occurrences logged per class.
pub const DEFAULT_LOG_THRESHOLD: u64 = 10;

/// Lets the first `threshold` occurrences of each error class through and
/// counts the rest.
#[derive(Debug)]
pub struct ThresholdLimiter {
    threshold: u64,
    counts: DashMap<&'static str, u64>,
}

impl Default for ThresholdLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_THRESHOLD)
    }
}

impl ThresholdLimiter {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            counts: DashMap::new(),
        }
    }

    /// Count one occurrence of `class`; run `log` if it is under the threshold.
    ///
    /// Returns whether `log` ran.
    pub fn handle<F: FnOnce()>(&self, class: &'static str, log: F) -> bool {
        let count = {
            let mut entry = self.counts.entry(class).or_insert(0);
            *entry += 1;
            *entry
        };
        if count <= self.threshold {
            log();
            true
        } else {
            false
        }
    }

    /// Total occurrences of `class`.
    pub fn count(&self, class: &str) -> u64 {
        self.counts.get(class).map(|c| *c).unwrap_or(0)
    }

    /// Classes that went over the threshold, with the number suppressed.
    pub fn suppressed(&self) -> Vec<(&'static str, u64)> {
        let mut out: Vec<_> = self
            .counts
            .iter()
            .filter(|e| *e.value() > self.threshold)
            .map(|e| (*e.key(), *e.value() - self.threshold))
            .collect();
        out.sort();
        out
    }

    /// Log one summary line per suppressed class.
    pub fn log_summary(&self) {
        for (class, suppressed) in self.suppressed() {
            warn!(class, suppressed, "Suppressed repeated errors");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_threshold_per_class() {
        let limiter = ThresholdLimiter::new(2);
        let mut logged = 0;
        for _ in 0..5 {
            limiter.handle("envelope_decode", || logged += 1);
        }
        limiter.handle("empty", || logged += 1);

        assert_eq!(logged, 3);
        assert_eq!(limiter.count("envelope_decode"), 5);
        assert_eq!(limiter.suppressed(), vec![("envelope_decode", 3)]);
    }

    #[traced_test]
    #[test]
    fn test_summary_is_logged() {
        let limiter = ThresholdLimiter::new(0);
        limiter.handle("transaction_decode", || {});
        limiter.log_summary();
        assert!(logs_contain("Suppressed repeated errors"));
    }
}
