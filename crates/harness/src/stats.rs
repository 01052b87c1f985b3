//! Periodic statistics logging.

use replaygate_core::NetworkMetrics;
use replaygate_governor::SubmissionMetrics;
use parking_lot::Mutex;
use replaygate_state::{SnapshotArena, SnapshotHandle};
use replaygate_types::NodeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default time between two stats lines.
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

const STOP_POLL: Duration = Duration::from_millis(100);

/// Read-only view of one node for the sampler.
#[derive(Debug, Clone)]
pub struct NodeProbe {
    pub node: NodeId,
    pub metrics: Arc<SubmissionMetrics>,
    pub arena: Arc<SnapshotArena>,
}

/// One node's numbers at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSample {
    pub node: NodeId,
    pub submitted: u64,
    pub submitted_bytes: u64,
    /// Local submission rate of the current measurement cycle.
    pub tps: f64,
    pub version: u64,
    pub entities: usize,
    /// Transactions applied across all creators.
    pub applied: u64,
    /// A newer snapshot was published since the previous sample.
    pub advanced: bool,
}

/// Logs submission, replay and network numbers at a fixed interval.
///
/// Reads snapshots only, so it never blocks a delivery worker. The handle
/// read at each sample is kept so the next sample can tell whether the node
/// published anything in between.
pub struct StatsSampler {
    probes: Vec<NodeProbe>,
    held: Mutex<Vec<SnapshotHandle>>,
    network: Arc<dyn NetworkMetrics>,
    interval: Duration,
}

impl StatsSampler {
    pub fn new(probes: Vec<NodeProbe>, network: Arc<dyn NetworkMetrics>) -> Self {
        let held = probes.iter().map(|probe| probe.arena.latest()).collect();
        Self {
            probes,
            held: Mutex::new(held),
            network,
            interval: STATS_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(STOP_POLL);
        self
    }

    pub fn sample(&self, now: Instant) -> Vec<NodeSample> {
        let mut held = self.held.lock();
        self.probes
            .iter()
            .zip(held.iter_mut())
            .map(|(probe, previous)| {
                let advanced = probe.arena.is_stale(previous);
                if advanced {
                    *previous = probe.arena.latest();
                }
                let snapshot = &*previous;
                NodeSample {
                    node: probe.node,
                    submitted: probe.metrics.total_transactions(),
                    submitted_bytes: probe.metrics.total_bytes(),
                    tps: probe.metrics.tps(now),
                    version: snapshot.version(),
                    entities: snapshot.entity_count(),
                    applied: snapshot.counters().total().total(),
                    advanced,
                }
            })
            .collect()
    }

    /// Emit one line per node plus one for the network.
    pub fn log(&self, now: Instant) {
        for sample in self.sample(now) {
            info!(
                node = %sample.node,
                submitted = sample.submitted,
                bytes = sample.submitted_bytes,
                tps = format!("{:.1}", sample.tps),
                version = sample.version,
                entities = sample.entities,
                applied = sample.applied,
                advanced = sample.advanced,
                "Node stats"
            );
            if !sample.advanced && sample.submitted > 0 {
                warn!(node = %sample.node, version = sample.version, "No new state since the last sample");
            }
        }
        info!(
            events_per_sec = format!("{:.1}", self.network.events_per_sec()),
            rounds_per_sec = format!("{:.1}", self.network.rounds_per_sec()),
            tx_per_event = format!("{:.2}", self.network.transactions_per_event()),
            c2c_latency_ms = self.network.c2c_latency().as_millis() as u64,
            "Network stats"
        );
    }

    /// Log every interval until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        let mut next = Instant::now() + self.interval;
        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next {
                self.log(now);
                next = now + self.interval;
            }
            std::thread::sleep(STOP_POLL.min(next.saturating_duration_since(now)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaygate_core::FixedNetworkMetrics;
    use replaygate_state::MutableState;
    use replaygate_types::PayloadType;

    #[test]
    fn test_sample_reads_metrics_and_snapshot() {
        let start = Instant::now();
        let metrics = Arc::new(SubmissionMetrics::new(start, Duration::from_secs(1)));
        metrics.record(PayloadType::Bytes, 40);
        metrics.record(PayloadType::Bytes, 60);

        let mut state = MutableState::genesis(1, 1);
        state.counters_mut().record(0, PayloadType::Bytes);
        let arena = Arc::new(SnapshotArena::new(state.publish()));

        let sampler = StatsSampler::new(
            vec![NodeProbe {
                node: NodeId(0),
                metrics,
                arena,
            }],
            Arc::new(FixedNetworkMetrics::new()),
        );
        let samples = sampler.sample(start + Duration::from_secs(2));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].submitted, 2);
        assert_eq!(samples[0].submitted_bytes, 100);
        assert_eq!(samples[0].applied, 1);
        assert_eq!(samples[0].tps, 1.0);
    }

    #[test]
    fn test_sample_tracks_new_publications() {
        let start = Instant::now();
        let mut state = MutableState::genesis(1, 1);
        let arena = Arc::new(SnapshotArena::new(state.publish()));
        let sampler = StatsSampler::new(
            vec![NodeProbe {
                node: NodeId(0),
                metrics: Arc::new(SubmissionMetrics::new(start, Duration::from_secs(1))),
                arena: arena.clone(),
            }],
            Arc::new(FixedNetworkMetrics::new()),
        );
        assert!(!sampler.sample(start)[0].advanced, "nothing published yet");

        state.counters_mut().record(0, PayloadType::Bytes);
        arena.publish(state.publish());
        let sample = &sampler.sample(start)[0];
        assert!(sample.advanced);
        assert_eq!(sample.applied, 1);

        assert!(!sampler.sample(start)[0].advanced, "handle was refreshed");
    }

    #[test]
    fn test_run_stops_promptly() {
        let sampler = StatsSampler::new(Vec::new(), Arc::new(FixedNetworkMetrics::new()))
            .with_interval(Duration::from_millis(100));
        let stop = AtomicBool::new(true);
        let before = Instant::now();
        sampler.run(&stop);
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
