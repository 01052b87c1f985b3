//! In-process ordering engine.
//!
//! Stands in for the external ordering engine. Each node owns a bounded
//! submission queue; the round former drains the queues in roster order
//! (one event per node with pending transactions), stamps every transaction
//! with a strictly increasing consensus timestamp and hands each subscriber
//! an identical copy of the round.
//!
//! ```text
//!  node 0 ──try_send──► [queue 0] ─┐
//!  node 1 ──try_send──► [queue 1] ─┼─► step() ─► Round ─┬─► node 0 delivery
//!  node 2 ──try_send──► [queue 2] ─┘                    ├─► node 1 delivery
//!                                                       └─► node 2 delivery
//! ```

use crate::config::{ConfigError, MAX_EVENT_TRANSACTIONS, MAX_QUEUE_CAPACITY};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use replaygate_core::{DeliveredTransaction, NetworkMetrics, OrderingEngine, Round};
use replaygate_types::{ConsensusTimestamp, NodeId, Roster, RoundNumber};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Window over which network metrics are averaged.
pub const METRICS_WINDOW: Duration = Duration::from_secs(5);

/// Ordering engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each node's submission queue.
    pub queue_capacity: usize,
    /// Time between rounds.
    pub round_interval_ms: u64,
    /// Most transactions one node contributes to a round.
    pub max_event_transactions: usize,
    pub software_version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            round_interval_ms: 20,
            max_event_transactions: 1_000,
            software_version: 1,
        }
    }
}

impl EngineConfig {
    pub fn with_round_interval(mut self, interval: Duration) -> Self {
        self.round_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("engine.queue_capacity"));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::ResourceLimit {
                name: "engine.queue_capacity",
                value: self.queue_capacity as u64,
                limit: MAX_QUEUE_CAPACITY as u64,
            });
        }
        if self.max_event_transactions == 0 {
            return Err(ConfigError::Zero("engine.max_event_transactions"));
        }
        if self.max_event_transactions > MAX_EVENT_TRANSACTIONS {
            return Err(ConfigError::ResourceLimit {
                name: "engine.max_event_transactions",
                value: self.max_event_transactions as u64,
                limit: MAX_EVENT_TRANSACTIONS as u64,
            });
        }
        if self.round_interval_ms == 0 {
            return Err(ConfigError::Zero("engine.round_interval_ms"));
        }
        Ok(())
    }
}

struct Submission {
    bytes: Vec<u8>,
    submitted: Instant,
}

struct Clock {
    round: RoundNumber,
    last: ConsensusTimestamp,
}

#[derive(Debug, Clone, Copy)]
struct RoundSample {
    at: Instant,
    events: u64,
    transactions: u64,
    latency_micros: u64,
}

struct Throughput {
    window: VecDeque<RoundSample>,
    rounds: u64,
    events: u64,
    transactions: u64,
    latency_micros: Option<Histogram<u64>>,
}

impl Throughput {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            rounds: 0,
            events: 0,
            transactions: 0,
            latency_micros: Histogram::new(3).ok(),
        }
    }

    fn record(&mut self, sample: RoundSample, latencies: &[u64]) {
        self.rounds += 1;
        self.events += sample.events;
        self.transactions += sample.transactions;
        if let Some(histogram) = self.latency_micros.as_mut() {
            for micros in latencies {
                histogram.saturating_record((*micros).max(1));
            }
        }
        self.window.push_back(sample);
        self.prune(sample.at);
    }

    fn record_idle(&mut self, now: Instant) {
        self.window.push_back(RoundSample {
            at: now,
            events: 0,
            transactions: 0,
            latency_micros: 0,
        });
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while self
            .window
            .front()
            .is_some_and(|s| now.saturating_duration_since(s.at) > METRICS_WINDOW)
        {
            self.window.pop_front();
        }
    }

    fn span(&self, now: Instant) -> Duration {
        self.window
            .front()
            .map_or(METRICS_WINDOW, |s| now.saturating_duration_since(s.at))
            .max(Duration::from_secs(1))
    }

    fn per_sec(&mut self, now: Instant, value: impl Fn(&RoundSample) -> u64) -> f64 {
        self.prune(now);
        let total: u64 = self.window.iter().map(value).sum();
        total as f64 / self.span(now).as_secs_f64()
    }

    fn latency_at(&self, q: f64) -> Option<Duration> {
        self.latency_micros
            .as_ref()
            .filter(|h| !h.is_empty())
            .map(|h| Duration::from_micros(h.value_at_quantile(q)))
    }
}

/// Totals over the lifetime of the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineSummary {
    pub rounds: u64,
    pub events: u64,
    pub transactions: u64,
    /// Submissions refused because a queue was full.
    pub rejected: u64,
    pub latency_p50: Option<Duration>,
    pub latency_p99: Option<Duration>,
    pub latency_max: Option<Duration>,
}

/// In-process ordering engine shared by every node of a cluster.
pub struct LocalOrderingEngine {
    config: EngineConfig,
    nodes: Vec<NodeId>,
    queues: Vec<(Sender<Submission>, Receiver<Submission>)>,
    subscribers: Mutex<Vec<Sender<Round>>>,
    clock: Mutex<Clock>,
    throughput: Mutex<Throughput>,
    rejected: Arc<AtomicU64>,
    epoch: Instant,
    wall_base: ConsensusTimestamp,
}

impl std::fmt::Debug for LocalOrderingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOrderingEngine")
            .field("nodes", &self.nodes)
            .field("config", &self.config)
            .finish()
    }
}

impl LocalOrderingEngine {
    pub fn new(config: EngineConfig, roster: &dyn Roster) -> Self {
        let nodes = roster.nodes().to_vec();
        let queues = nodes
            .iter()
            .map(|_| channel::bounded(config.queue_capacity))
            .collect();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            config,
            nodes,
            queues,
            subscribers: Mutex::new(Vec::new()),
            clock: Mutex::new(Clock {
                round: RoundNumber::GENESIS.next(),
                last: ConsensusTimestamp::ZERO,
            }),
            throughput: Mutex::new(Throughput::new()),
            rejected: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
            wall_base: ConsensusTimestamp::from_duration(wall),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submission handle for `node`, or `None` if it is not in the roster.
    pub fn connect(&self, node: NodeId) -> Option<EngineHandle> {
        let index = self.nodes.iter().position(|n| *n == node)?;
        Some(EngineHandle {
            node,
            sender: self.queues[index].0.clone(),
            rejected: Arc::clone(&self.rejected),
        })
    }

    /// Receive every round formed from now on.
    pub fn subscribe(&self) -> Receiver<Round> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Transactions waiting in `node`'s queue.
    pub fn queue_len(&self, node: NodeId) -> usize {
        self.nodes
            .iter()
            .position(|n| *n == node)
            .map_or(0, |i| self.queues[i].1.len())
    }

    fn wall_at(&self, instant: Instant) -> ConsensusTimestamp {
        self.wall_base
            .plus(instant.saturating_duration_since(self.epoch))
    }

    /// Form one round from the pending submissions and deliver it.
    ///
    /// Returns `None` when every queue was empty. Such an idle round still
    /// counts toward [`NetworkMetrics::rounds_per_sec`] but is not delivered.
    pub fn step(&self) -> Option<Round> {
        let now = Instant::now();
        let mut clock = self.clock.lock();

        let mut transactions = Vec::new();
        let mut latencies = Vec::new();
        let mut events = 0u64;
        for (node, (_, queue)) in self.nodes.iter().zip(&self.queues) {
            let batch: Vec<Submission> = queue
                .try_iter()
                .take(self.config.max_event_transactions)
                .collect();
            let Some(first) = batch.first() else {
                continue;
            };
            events += 1;
            let time_created = self.wall_at(first.submitted);
            for submission in batch {
                let timestamp = self
                    .wall_at(now)
                    .max(clock.last.plus_nanos(ConsensusTimestamp::MIN_SPACING_NANOS));
                clock.last = timestamp;
                let waited = now.saturating_duration_since(submission.submitted);
                latencies.push(u64::try_from(waited.as_micros()).unwrap_or(u64::MAX));
                transactions.push(DeliveredTransaction {
                    creator: *node,
                    software_version: self.config.software_version,
                    time_created,
                    consensus_timestamp: timestamp,
                    payload: submission.bytes,
                });
            }
        }
        if transactions.is_empty() {
            drop(clock);
            // Consensus keeps advancing without transactions; only the rate sees it.
            self.throughput.lock().record_idle(now);
            return None;
        }

        let round = Round::new(clock.round, transactions);
        clock.round = clock.round.next();
        trace!(
            round = %round.number,
            events,
            transactions = round.transactions.len(),
            "Round formed"
        );

        // Fan out under the clock lock so every subscriber sees rounds in order.
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(round.clone()).is_ok());
        drop(clock);

        let latency_micros = latencies.iter().sum();
        self.throughput.lock().record(
            RoundSample {
                at: now,
                events,
                transactions: round.transactions.len() as u64,
                latency_micros,
            },
            &latencies,
        );
        Some(round)
    }

    /// Form rounds every round interval until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        debug!(
            nodes = self.nodes.len(),
            interval_ms = self.config.round_interval_ms,
            "Ordering engine started"
        );
        while !stop.load(Ordering::Relaxed) {
            self.step();
            std::thread::sleep(self.config.round_interval());
        }
        debug!("Ordering engine stopped");
    }

    pub fn summary(&self) -> EngineSummary {
        let throughput = self.throughput.lock();
        EngineSummary {
            rounds: throughput.rounds,
            events: throughput.events,
            transactions: throughput.transactions,
            rejected: self.rejected.load(Ordering::Relaxed),
            latency_p50: throughput.latency_at(0.5),
            latency_p99: throughput.latency_at(0.99),
            latency_max: throughput.latency_at(1.0),
        }
    }
}

impl NetworkMetrics for LocalOrderingEngine {
    fn events_per_sec(&self) -> f64 {
        self.throughput
            .lock()
            .per_sec(Instant::now(), |s| s.events)
    }

    fn rounds_per_sec(&self) -> f64 {
        self.throughput.lock().per_sec(Instant::now(), |_| 1)
    }

    fn transactions_per_event(&self) -> f64 {
        let mut throughput = self.throughput.lock();
        throughput.prune(Instant::now());
        let events: u64 = throughput.window.iter().map(|s| s.events).sum();
        let transactions: u64 = throughput.window.iter().map(|s| s.transactions).sum();
        if events == 0 {
            0.0
        } else {
            transactions as f64 / events as f64
        }
    }

    fn c2c_latency(&self) -> Duration {
        let mut throughput = self.throughput.lock();
        throughput.prune(Instant::now());
        let transactions: u64 = throughput.window.iter().map(|s| s.transactions).sum();
        let micros: u64 = throughput.window.iter().map(|s| s.latency_micros).sum();
        Duration::from_micros(micros.checked_div(transactions).unwrap_or(0))
    }
}

/// A node's submission path into the [`LocalOrderingEngine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    node: NodeId,
    sender: Sender<Submission>,
    rejected: Arc<AtomicU64>,
}

impl EngineHandle {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl OrderingEngine for EngineHandle {
    fn create_transaction(&self, bytes: Vec<u8>) -> bool {
        let submission = Submission {
            bytes,
            submitted: Instant::now(),
        };
        match self.sender.try_send(submission) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
