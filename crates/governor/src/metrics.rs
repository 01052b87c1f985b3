//! Local submission metrics.

use dashmap::DashMap;
use parking_lot::Mutex;
use replaygate_types::{PayloadCategory, PayloadType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bytes and transactions submitted by this node.
///
/// The cycle counters feed the goal check and restart whenever the goal or
/// the phase changes. Lifetime totals per category are never reset and are
/// what the stats logger and the end-of-run report read. Only the
/// submission worker records; any thread may read.
#[derive(Debug)]
pub struct SubmissionMetrics {
    cycle_start: Mutex<Instant>,
    cycle_bytes: AtomicU64,
    cycle_transactions: AtomicU64,
    total_bytes: AtomicU64,
    total_transactions: AtomicU64,
    per_category: DashMap<PayloadCategory, u64>,
    per_type: DashMap<PayloadType, u64>,
    min_window: Duration,
}

impl SubmissionMetrics {
    /// Start a measurement cycle at `now`.
    pub fn new(now: Instant, min_window: Duration) -> Self {
        Self {
            cycle_start: Mutex::new(now),
            cycle_bytes: AtomicU64::new(0),
            cycle_transactions: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            total_transactions: AtomicU64::new(0),
            per_category: DashMap::new(),
            per_type: DashMap::new(),
            min_window,
        }
    }

    /// Account for one submitted transaction.
    pub fn record(&self, payload_type: PayloadType, bytes: usize) {
        let bytes = bytes as u64;
        self.cycle_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.cycle_transactions.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_transactions.fetch_add(1, Ordering::Relaxed);
        *self.per_category.entry(payload_type.category()).or_insert(0) += 1;
        *self.per_type.entry(payload_type).or_insert(0) += 1;
    }

    /// Begin a new measurement cycle.
    pub fn reset(&self, now: Instant) {
        *self.cycle_start.lock() = now;
        self.cycle_bytes.store(0, Ordering::Relaxed);
        self.cycle_transactions.store(0, Ordering::Relaxed);
    }

    /// Time since the cycle began, never less than the minimum window.
    fn window(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(*self.cycle_start.lock());
        elapsed.max(self.min_window)
    }

    /// Average bytes per second over the current cycle.
    pub fn bytes_per_sec(&self, now: Instant) -> f64 {
        self.cycle_bytes.load(Ordering::Relaxed) as f64 / self.window(now).as_secs_f64()
    }

    /// Average transactions per second over the current cycle.
    pub fn tps(&self, now: Instant) -> f64 {
        self.cycle_transactions.load(Ordering::Relaxed) as f64 / self.window(now).as_secs_f64()
    }

    pub fn cycle_bytes(&self) -> u64 {
        self.cycle_bytes.load(Ordering::Relaxed)
    }

    pub fn cycle_transactions(&self) -> u64 {
        self.cycle_transactions.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn total_transactions(&self) -> u64 {
        self.total_transactions.load(Ordering::Relaxed)
    }

    /// Lifetime submissions in a category.
    pub fn submitted(&self, category: PayloadCategory) -> u64 {
        self.per_category.get(&category).map(|v| *v).unwrap_or(0)
    }

    /// Lifetime submissions of a payload type.
    pub fn submitted_of_type(&self, payload_type: PayloadType) -> u64 {
        self.per_type.get(&payload_type).map(|v| *v).unwrap_or(0)
    }

    /// Lifetime submissions by category, sorted.
    pub fn by_category(&self) -> Vec<(PayloadCategory, u64)> {
        let mut out: Vec<_> = self.per_category.iter().map(|e| (*e.key(), *e.value())).collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_use_minimum_window() {
        let start = Instant::now();
        let metrics = SubmissionMetrics::new(start, Duration::from_secs(1));
        metrics.record(PayloadType::Bytes, 500);
        metrics.record(PayloadType::Bytes, 500);

        let early = start + Duration::from_millis(100);
        assert_eq!(metrics.bytes_per_sec(early), 1000.0, "burst measured against a full second");
        assert_eq!(metrics.tps(early), 2.0);

        let later = start + Duration::from_secs(4);
        assert_eq!(metrics.bytes_per_sec(later), 250.0);
    }

    #[test]
    fn test_reset_keeps_lifetime_totals() {
        let start = Instant::now();
        let metrics = SubmissionMetrics::new(start, Duration::from_secs(1));
        metrics.record(PayloadType::EntityCreate, 100);
        metrics.record(PayloadType::TreeUpdate, 40);

        metrics.reset(start + Duration::from_secs(2));
        assert_eq!(metrics.cycle_bytes(), 0);
        assert_eq!(metrics.cycle_transactions(), 0);
        assert_eq!(metrics.total_bytes(), 140);
        assert_eq!(metrics.total_transactions(), 2);
        assert_eq!(metrics.submitted(PayloadCategory::Entity), 1);
        assert_eq!(metrics.submitted_of_type(PayloadType::TreeUpdate), 1);
        assert_eq!(
            metrics.by_category(),
            vec![(PayloadCategory::Entity, 1), (PayloadCategory::Tree, 1)]
        );
    }
}
