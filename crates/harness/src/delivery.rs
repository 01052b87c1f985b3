//! Per-node delivery worker.
//!
//! Receives rounds from the ordering engine, applies them to the node's
//! [`ReplicatedStateMachine`] and carries out the actions it returns:
//! exports are written here (with submission force-paused), phase changes
//! are forwarded to the node's orchestrator as [`PhaseSignal`]s.
//!
//! A node whose round backlog grows past the configured limit is treated as
//! having fallen behind: it copies the newest peer snapshot, rebuilds from
//! it and skips every queued round the snapshot already covers.

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use replaygate_bottleneck::SyntheticBottleneck;
use replaygate_core::{Action, Event, PlatformStatus, Round, StateMachine};
use replaygate_state::{export_expected_state, ReplicatedStateMachine, SnapshotArena, StateSnapshot};
use replaygate_types::{ConsensusTimestamp, ControlType, NodeId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How long the worker blocks on an empty round channel before re-checking
/// the stop flag.
const DELIVERY_POLL: Duration = Duration::from_millis(50);

/// Phase changes forwarded from the delivery worker to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignal {
    QuorumReached {
        control: ControlType,
        timestamp: ConsensusTimestamp,
    },
    FreezeScheduled {
        start: ConsensusTimestamp,
    },
    /// The node rebuilt its state from a peer snapshot.
    Reconnected,
}

/// What a delivery worker observed over its lifetime.
#[derive(Debug, Clone, Default)]
pub struct DeliveryOutcome {
    /// Control types that reached quorum, in order.
    pub quorums: Vec<(ControlType, ConsensusTimestamp)>,
    pub exports: Vec<PathBuf>,
    pub export_failures: u64,
    pub reconnects: u32,
    /// Rounds dropped because a peer snapshot already covered them.
    pub skipped_rounds: u64,
    pub freeze_at: Option<ConsensusTimestamp>,
    /// Time spent in the synthetic bottleneck.
    pub throttled: Duration,
}

impl DeliveryOutcome {
    pub fn reached(&self, control: ControlType) -> bool {
        self.quorums.iter().any(|(kind, _)| *kind == control)
    }
}

/// The machine and outcome handed back when a worker stops.
#[derive(Debug)]
pub struct FinishedDelivery {
    pub machine: ReplicatedStateMachine,
    pub outcome: DeliveryOutcome,
}

/// Snapshot arenas of the other nodes, used as reconnect sources.
pub type PeerArenas = Arc<Vec<(NodeId, Arc<SnapshotArena>)>>;

/// Drives one node's replay.
pub struct DeliveryWorker {
    machine: ReplicatedStateMachine,
    rounds: Receiver<Round>,
    signals: Sender<PhaseSignal>,
    force_pause: Arc<AtomicBool>,
    bottleneck: Option<Arc<SyntheticBottleneck>>,
    peers: PeerArenas,
    export_dir: PathBuf,
    random_delay: Duration,
    reconnect_backlog: usize,
    rng: ChaCha8Rng,
    started: Instant,
    /// Rounds up to this timestamp are covered by a loaded snapshot.
    resume_after: Option<ConsensusTimestamp>,
    outcome: DeliveryOutcome,
}

impl DeliveryWorker {
    pub fn new(
        machine: ReplicatedStateMachine,
        rounds: Receiver<Round>,
        signals: Sender<PhaseSignal>,
        force_pause: Arc<AtomicBool>,
    ) -> Self {
        let seed = machine.node().0;
        Self {
            machine,
            rounds,
            signals,
            force_pause,
            bottleneck: None,
            peers: Arc::new(Vec::new()),
            export_dir: PathBuf::from("expected_state"),
            random_delay: Duration::ZERO,
            reconnect_backlog: 64,
            rng: ChaCha8Rng::seed_from_u64(seed),
            started: Instant::now(),
            resume_after: None,
            outcome: DeliveryOutcome::default(),
        }
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn with_bottleneck(mut self, bottleneck: Arc<SyntheticBottleneck>) -> Self {
        self.bottleneck = Some(bottleneck);
        self
    }

    pub fn with_peers(mut self, peers: PeerArenas) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_random_delay(mut self, max: Duration) -> Self {
        self.random_delay = max;
        self
    }

    pub fn with_reconnect_backlog(mut self, backlog: usize) -> Self {
        self.reconnect_backlog = backlog.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn node(&self) -> NodeId {
        self.machine.node()
    }

    pub fn machine(&self) -> &ReplicatedStateMachine {
        &self.machine
    }

    pub fn outcome(&self) -> &DeliveryOutcome {
        &self.outcome
    }

    /// Deliver rounds until `stop` is set or the engine goes away.
    pub fn run(mut self, stop: &AtomicBool) -> FinishedDelivery {
        info!(node = %self.node(), "Delivery worker started");
        while !stop.load(Ordering::Relaxed) {
            match self.rounds.recv_timeout(DELIVERY_POLL) {
                Ok(round) => {
                    if self.rounds.len() >= self.reconnect_backlog {
                        self.reconnect();
                    }
                    self.deliver(round);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.machine.limiter().log_summary();
        info!(
            node = %self.node(),
            rounds = self.machine.stats().rounds,
            version = self.machine.arena().latest().version(),
            reconnects = self.outcome.reconnects,
            "Delivery worker stopped"
        );
        FinishedDelivery {
            machine: self.machine,
            outcome: self.outcome,
        }
    }

    /// Apply one round and execute the resulting actions.
    pub fn deliver(&mut self, round: Round) {
        if let Some(covered) = self.resume_after {
            if round.last_timestamp().is_some_and(|last| last <= covered) {
                self.outcome.skipped_rounds += 1;
                trace!(node = %self.node(), round = %round.number, "Round covered by snapshot");
                return;
            }
            self.resume_after = None;
        }

        if !self.random_delay.is_zero() {
            let max = u64::try_from(self.random_delay.as_millis()).unwrap_or(u64::MAX);
            std::thread::sleep(Duration::from_millis(self.rng.gen_range(0..=max)));
        }
        if let Some(bottleneck) = &self.bottleneck {
            self.outcome.throttled += bottleneck.throttle_if_needed(self.machine.node());
        }

        self.machine.set_time(self.started.elapsed());
        let actions = self.machine.handle(Event::ConsensusRound(round));
        self.execute(actions);
    }

    /// Rebuild from the newest peer snapshot if it is ahead of ours.
    ///
    /// Returns true when a snapshot was loaded.
    pub fn reconnect(&mut self) -> bool {
        let node = self.machine.node();
        let ours = self.machine.arena().latest().last_timestamp();
        let best = self
            .peers
            .iter()
            .filter(|(peer, _)| *peer != node)
            .map(|(peer, arena)| (*peer, arena.latest()))
            .max_by_key(|(_, snapshot)| snapshot.last_timestamp());
        let Some((peer, snapshot)) = best else {
            return false;
        };
        if snapshot.last_timestamp() <= ours {
            debug!(node = %node, peer = %peer, "No peer is ahead; not reconnecting");
            return false;
        }

        // Go through the wire form, as a real state transfer would.
        let restored = match snapshot
            .to_bytes()
            .and_then(|bytes| StateSnapshot::from_bytes(&bytes))
        {
            Ok(restored) => restored,
            Err(error) => {
                warn!(node = %node, peer = %peer, error = %error, "Snapshot transfer failed");
                return false;
            }
        };

        info!(
            node = %node,
            peer = %peer,
            backlog = self.rounds.len(),
            version = restored.version(),
            "Node fell behind; reconnecting from peer snapshot"
        );
        self.machine.handle(Event::StatusChanged(PlatformStatus::Behind));
        self.machine
            .handle(Event::StatusChanged(PlatformStatus::Reconnecting));

        let epochs_before = ControlType::ALL.map(|kind| self.machine.quorum().fired_epoch(kind));
        let covered = restored.last_timestamp();
        self.resume_after = Some(covered);
        self.machine.load_snapshot(restored);
        self.machine.handle(Event::StatusChanged(PlatformStatus::Active));

        // Quorums reached inside the skipped rounds never produced actions here.
        for (kind, before) in ControlType::ALL.into_iter().zip(epochs_before) {
            if self.machine.quorum().fired_epoch(kind) > before {
                self.outcome.quorums.push((kind, covered));
                self.signal(PhaseSignal::QuorumReached {
                    control: kind,
                    timestamp: covered,
                });
            }
        }

        self.outcome.reconnects += 1;
        if let Some(bottleneck) = &self.bottleneck {
            bottleneck.register_reconnect(node);
        }
        self.signal(PhaseSignal::Reconnected);
        true
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            trace!(node = %self.node(), action = action.type_name(), "Executing action");
            match action {
                Action::QuorumReached { control, timestamp } => {
                    self.outcome.quorums.push((control, timestamp));
                    self.signal(PhaseSignal::QuorumReached { control, timestamp });
                }
                Action::ExportExpectedState { node, timestamp } => self.export(node, timestamp),
                Action::FreezeScheduled { start } => {
                    info!(node = %self.node(), start = %start, "Freeze scheduled");
                    self.outcome.freeze_at = Some(start);
                    self.signal(PhaseSignal::FreezeScheduled { start });
                }
                Action::DivergenceDetected { key, reason } => {
                    debug!(node = %self.node(), key = %key, reason = %reason, "Divergence detected");
                }
            }
        }
    }

    /// Write the expected map with goal-governed submission paused.
    fn export(&mut self, node: NodeId, timestamp: ConsensusTimestamp) {
        let was_paused = self.force_pause.swap(true, Ordering::SeqCst);
        let result = export_expected_state(&self.export_dir, node, timestamp, self.machine.expected());
        if !was_paused {
            self.force_pause.store(false, Ordering::SeqCst);
        }
        match result {
            Ok(path) => self.outcome.exports.push(path),
            Err(error) => {
                self.outcome.export_failures += 1;
                warn!(node = %node, timestamp = %timestamp, error = %error, "Export failed");
            }
        }
    }

    fn signal(&self, signal: PhaseSignal) {
        if self.signals.send(signal).is_err() {
            trace!(node = %self.node(), ?signal, "Orchestrator gone; dropping signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use replaygate_core::DeliveredTransaction;
    use replaygate_quorum::QuorumGate;
    use replaygate_state::MachineConfig;
    use replaygate_types::{PayloadType, Roster, RoundNumber, StaticRoster};
    use replaygate_workload::{FactoryConfig, PayloadFactory};

    const MS: u64 = 1_000_000;

    struct Setup {
        worker: DeliveryWorker,
        rounds: Sender<Round>,
        signals: Receiver<PhaseSignal>,
        force_pause: Arc<AtomicBool>,
    }

    fn machine(node: u64, roster: &Arc<dyn Roster>) -> ReplicatedStateMachine {
        let quorum = Arc::new(QuorumGate::new(Arc::clone(roster)));
        ReplicatedStateMachine::new(MachineConfig::new(NodeId(node)), Arc::clone(roster), quorum)
    }

    fn setup(node: u64, roster: &Arc<dyn Roster>) -> Setup {
        let (rounds_tx, rounds_rx) = channel::unbounded();
        let (signals_tx, signals_rx) = channel::unbounded();
        let force_pause = Arc::new(AtomicBool::new(false));
        let worker = DeliveryWorker::new(
            machine(node, roster),
            rounds_rx,
            signals_tx,
            Arc::clone(&force_pause),
        );
        Setup {
            worker,
            rounds: rounds_tx,
            signals: signals_rx,
            force_pause,
        }
    }

    fn roster(n: u64) -> Arc<dyn Roster> {
        Arc::new(StaticRoster::uniform(n).unwrap())
    }

    fn factory(node: u64) -> PayloadFactory {
        PayloadFactory::new(FactoryConfig::new(NodeId(node)).with_signing(false))
    }

    fn round(number: u64, txs: Vec<(u64, Vec<u8>)>, start_ms: u64) -> Round {
        let transactions = txs
            .into_iter()
            .enumerate()
            .map(|(i, (creator, payload))| {
                let ts = ConsensusTimestamp((start_ms + i as u64) * MS);
                DeliveredTransaction {
                    creator: NodeId(creator),
                    software_version: 1,
                    time_created: ts,
                    consensus_timestamp: ts,
                    payload,
                }
            })
            .collect();
        Round::new(RoundNumber(number), transactions)
    }

    fn creates(node: u64, count: usize) -> Vec<(u64, Vec<u8>)> {
        let mut factory = factory(node);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        (0..count)
            .map(|_| {
                let payload = factory.build(PayloadType::EntityCreate, 10, &mut rng).unwrap();
                (node, payload.bytes)
            })
            .collect()
    }

    #[test]
    fn test_validation_quorum_signals_and_exports() {
        let roster = roster(3);
        let dir = tempfile::tempdir().unwrap();
        let Setup {
            worker,
            signals,
            force_pause,
            ..
        } = setup(0, &roster);
        let mut worker = worker.with_export_dir(dir.path());

        let votes = vec![
            (0, factory(0).control(ControlType::EnterValidation).unwrap()),
            (1, factory(1).control(ControlType::EnterValidation).unwrap()),
        ];
        worker.deliver(round(1, votes, 1));

        let signal = signals.try_recv().expect("quorum signal");
        assert!(matches!(
            signal,
            PhaseSignal::QuorumReached {
                control: ControlType::EnterValidation,
                ..
            }
        ));
        assert!(worker.outcome().reached(ControlType::EnterValidation));
        assert_eq!(worker.outcome().exports.len(), 1);
        assert!(worker.outcome().exports[0].exists());
        assert!(!force_pause.load(Ordering::SeqCst), "pause released after export");
    }

    #[test]
    fn test_export_keeps_existing_pause() {
        let roster = roster(1);
        let dir = tempfile::tempdir().unwrap();
        let Setup {
            worker,
            force_pause,
            ..
        } = setup(0, &roster);
        let mut worker = worker.with_export_dir(dir.path());
        force_pause.store(true, Ordering::SeqCst);

        let vote = vec![(0, factory(0).control(ControlType::EnterValidation).unwrap())];
        worker.deliver(round(1, vote, 1));

        assert_eq!(worker.outcome().exports.len(), 1);
        assert!(force_pause.load(Ordering::SeqCst), "someone else's pause stays");
    }

    #[test]
    fn test_garbage_is_counted_not_fatal() {
        let roster = roster(2);
        let Setup { mut worker, .. } = setup(0, &roster);
        let mut txs = creates(1, 2);
        txs.insert(1, (1, vec![0xFF, 0x00, 0x13]));
        worker.deliver(round(1, txs, 1));

        assert_eq!(worker.machine().stats().decode_errors, 1);
        assert_eq!(worker.machine().arena().latest().entity_count(), 2);
    }

    #[test]
    fn test_reconnect_from_peer_skips_covered_rounds() {
        let roster = roster(2);
        let Setup {
            worker: mut ahead, ..
        } = setup(1, &roster);
        let Setup {
            worker,
            signals,
            ..
        } = setup(0, &roster);

        let first = round(1, creates(1, 3), 1);
        let second = round(2, creates(0, 2), 10);
        ahead.deliver(first.clone());
        ahead.deliver(second.clone());

        let peers: PeerArenas = Arc::new(vec![
            (NodeId(0), Arc::clone(worker.machine().arena())),
            (NodeId(1), Arc::clone(ahead.machine().arena())),
        ]);
        let mut behind = worker.with_peers(peers);

        assert!(behind.reconnect());
        assert_eq!(behind.machine().arena().latest().entity_count(), 5);
        assert_eq!(signals.try_recv().unwrap(), PhaseSignal::Reconnected);

        behind.deliver(first);
        behind.deliver(second);
        assert_eq!(behind.outcome().skipped_rounds, 2);
        assert_eq!(behind.machine().stats().seq_mismatches, 0);

        let vote = vec![(1, factory(1).control(ControlType::EnterSync).unwrap())];
        behind.deliver(round(3, vote, 20));
        assert_eq!(behind.outcome().skipped_rounds, 2, "newer rounds are applied");

        assert!(!behind.reconnect(), "not behind any more");
    }

    #[test]
    fn test_run_returns_on_disconnect() {
        let roster = roster(1);
        let Setup { worker, rounds, .. } = setup(0, &roster);
        rounds.send(round(1, creates(0, 4), 1)).unwrap();
        drop(rounds);

        let stop = AtomicBool::new(false);
        let finished = worker.run(&stop);
        assert_eq!(finished.machine.stats().rounds, 1);
        assert_eq!(finished.machine.arena().latest().entity_count(), 4);
    }
}
