//! Per-node submission loop.
//!
//! Pulls payloads from the node's generator and offers them through the
//! [`SubmissionGovernor`]. A vetoed payload is kept and retried after the
//! retry delay, so nothing the generator produced is lost. Control and
//! freeze transactions bypass the governor.
//!
//! The loop also drives the test's phases from the [`PhaseSignal`]s its
//! delivery worker forwards:
//!
//! ```text
//!  generator exhausted ──► ENTER_VALIDATION
//!  ENTER_VALIDATION quorum ──► stop generating, EXIT_VALIDATION
//!  EXIT_VALIDATION quorum ──► leader sends FREEZE, finish after a grace period
//!  ENTER_SYNC quorum ──► EXIT_SYNC
//!  Reconnected ──► governor re-reads the restored quorum
//! ```

use crate::config::SubmitOptions;
use crate::delivery::PhaseSignal;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use replaygate_core::OrderingEngine;
use replaygate_governor::SubmissionGovernor;
use replaygate_types::{ControlType, NodeId, PayloadType};
use replaygate_workload::{Generated, GeneratedPayload, PayloadGenerator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Wait between signal checks while not generating.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Generator errors logged before the rest are only counted.
const GENERATE_ERROR_LOG_LIMIT: u64 = 10;

/// What a submission loop did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Payloads accepted through the governor.
    pub submitted: u64,
    /// Submission attempts refused by a gate or the engine.
    pub vetoed: u64,
    pub no_match: u64,
    pub generate_errors: u64,
    pub controls_sent: Vec<ControlType>,
    pub freeze_sent: bool,
    /// The generator ran out of payloads.
    pub exhausted: bool,
    /// EXIT_VALIDATION reached quorum.
    pub validation_done: bool,
}

/// Drives one node's submissions and test phases.
pub struct Orchestrator {
    node: NodeId,
    generator: Box<dyn PayloadGenerator>,
    governor: SubmissionGovernor,
    engine: Arc<dyn OrderingEngine>,
    signals: Receiver<PhaseSignal>,
    options: SubmitOptions,
    start_delay: Duration,
    stop: Arc<AtomicBool>,
    pending: Option<GeneratedPayload>,
    generating: bool,
    finish_at: Option<Instant>,
    outcome: SubmitOutcome,
}

impl Orchestrator {
    pub fn new(
        node: NodeId,
        generator: Box<dyn PayloadGenerator>,
        governor: SubmissionGovernor,
        engine: Arc<dyn OrderingEngine>,
        signals: Receiver<PhaseSignal>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            node,
            generator,
            governor,
            engine,
            signals,
            options: SubmitOptions::default(),
            start_delay: Duration::ZERO,
            stop,
            pending: None,
            generating: true,
            finish_at: None,
            outcome: SubmitOutcome::default(),
        }
    }

    /// Apply submission options for the node at `roster_index`.
    pub fn with_options(mut self, options: SubmitOptions, roster_index: usize) -> Self {
        self.generating = options.may_submit(self.node);
        self.start_delay = options.start_delay(roster_index);
        self.options = options;
        self
    }

    pub fn governor(&self) -> &SubmissionGovernor {
        &self.governor
    }

    pub fn outcome(&self) -> &SubmitOutcome {
        &self.outcome
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    /// Run until the test finishes, `stop` is set, or the delivery worker
    /// goes away.
    pub fn run(mut self) -> SubmitOutcome {
        let started = Instant::now();
        info!(
            node = %self.node,
            generating = self.generating,
            start_delay_ms = self.start_delay.as_millis() as u64,
            "Orchestrator started"
        );

        while !self.stop.load(Ordering::Relaxed) {
            if self.finish_at.is_some_and(|at| Instant::now() >= at) {
                info!(node = %self.node, "Test finished");
                break;
            }
            if !self.generating || started.elapsed() < self.start_delay {
                if !self.wait_for_signal(IDLE_POLL) {
                    break;
                }
                continue;
            }
            self.drain_signals();
            if self.generating {
                self.step(Instant::now());
            }
        }

        info!(
            node = %self.node,
            submitted = self.outcome.submitted,
            vetoed = self.outcome.vetoed,
            validation_done = self.outcome.validation_done,
            "Orchestrator stopped"
        );
        self.outcome
    }

    /// One submission attempt at `now`.
    pub fn step(&mut self, now: Instant) {
        self.governor
            .set_customized_tps(self.generator.customized_tps(), now);

        let payload = match self.pending.take() {
            Some(payload) => payload,
            None => match self.generator.next_payload() {
                Ok(Generated::Payload(payload)) => payload,
                Ok(Generated::NoMatch) => {
                    self.outcome.no_match += 1;
                    return;
                }
                Ok(Generated::Control(kind)) => {
                    self.send_control(kind);
                    return;
                }
                Ok(Generated::Exhausted) => {
                    self.on_exhausted();
                    return;
                }
                Err(error) => {
                    self.outcome.generate_errors += 1;
                    if self.outcome.generate_errors <= GENERATE_ERROR_LOG_LIMIT {
                        warn!(node = %self.node, error = %error, "Failed to generate payload");
                    }
                    return;
                }
            },
        };

        match self.governor.try_submit_at(
            self.engine.as_ref(),
            payload.bytes.clone(),
            payload.payload_type,
            now,
        ) {
            Ok(()) => {
                self.outcome.submitted += 1;
                trace!(node = %self.node, payload_type = %payload.payload_type, "Submitted");
            }
            Err(veto) => {
                self.outcome.vetoed += 1;
                trace!(node = %self.node, ?veto, "Submission vetoed; retrying later");
                self.pending = Some(payload);
                self.wait_for_signal(self.options.retry_delay());
            }
        }
    }

    /// Handle one phase signal.
    pub fn on_signal(&mut self, signal: PhaseSignal) {
        match signal {
            PhaseSignal::QuorumReached { control, timestamp } => {
                debug!(node = %self.node, control = %control, timestamp = %timestamp, "Quorum signal");
                match control {
                    ControlType::EnterValidation => {
                        info!(node = %self.node, "Validation started");
                        self.generating = false;
                        self.send_control(ControlType::ExitValidation);
                    }
                    ControlType::ExitValidation => {
                        info!(node = %self.node, "Validation complete");
                        self.outcome.validation_done = true;
                        if self.node.is_leader() {
                            self.send_freeze();
                        }
                        self.finish_at = Some(Instant::now() + self.options.sleep_after_test());
                    }
                    ControlType::EnterSync => {
                        self.send_control(ControlType::ExitSync);
                    }
                    ControlType::ExitSync => {
                        info!(node = %self.node, "Sync phase complete");
                    }
                }
            }
            PhaseSignal::FreezeScheduled { start } => {
                info!(node = %self.node, start = %start, "Freeze acknowledged");
            }
            PhaseSignal::Reconnected => {
                self.governor.resync_quorum();
            }
        }
    }

    fn drain_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.on_signal(signal);
        }
    }

    /// Wait up to `timeout` for a signal. Returns false once the delivery
    /// worker is gone.
    fn wait_for_signal(&mut self, timeout: Duration) -> bool {
        match self.signals.recv_timeout(timeout) {
            Ok(signal) => {
                self.on_signal(signal);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn on_exhausted(&mut self) {
        self.generating = false;
        if self.outcome.exhausted {
            return;
        }
        self.outcome.exhausted = true;
        info!(
            node = %self.node,
            submitted = self.outcome.submitted,
            "Generator exhausted; entering validation"
        );
        self.send_control(ControlType::EnterValidation);
    }

    fn send_control(&mut self, kind: ControlType) -> bool {
        let bytes = match self.generator.control(kind) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(node = %self.node, control = %kind, error = %error, "Failed to encode control");
                return false;
            }
        };
        let sent = self.submit_reliably(bytes, PayloadType::Control);
        if sent {
            debug!(node = %self.node, control = %kind, "Control sent");
            self.outcome.controls_sent.push(kind);
        }
        sent
    }

    fn send_freeze(&mut self) {
        let start_after = self.options.freeze_after_secs;
        match self.generator.freeze(start_after) {
            Ok(bytes) => {
                self.outcome.freeze_sent = self.submit_reliably(bytes, PayloadType::Freeze);
                if self.outcome.freeze_sent {
                    info!(node = %self.node, start_after_secs = start_after, "Freeze sent");
                }
            }
            Err(error) => warn!(node = %self.node, error = %error, "Failed to encode freeze"),
        }
    }

    /// Retry until the engine takes the bytes or the run stops.
    fn submit_reliably(&self, bytes: Vec<u8>, payload_type: PayloadType) -> bool {
        loop {
            match self
                .governor
                .submit_unchecked(self.engine.as_ref(), bytes.clone(), payload_type)
            {
                Ok(()) => return true,
                Err(veto) => {
                    if self.stop.load(Ordering::Relaxed) {
                        return false;
                    }
                    trace!(node = %self.node, ?veto, "Engine busy; retrying");
                    std::thread::sleep(self.options.retry_delay());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Sender};
    use replaygate_core::{FixedNetworkMetrics, RecordingEngine};
    use replaygate_governor::GovernorConfig;
    use replaygate_quorum::QuorumGate;
    use replaygate_types::{decode_transaction, ConsensusTimestamp, Roster, StaticRoster, TransactionBody};
    use replaygate_workload::{
        FactoryConfig, PayloadMode, SequentialSchedule, Stage, WeightedPayloadGenerator,
    };

    struct Setup {
        orchestrator: Orchestrator,
        engine: Arc<RecordingEngine>,
        signals: Sender<PhaseSignal>,
        stop: Arc<AtomicBool>,
    }

    fn setup(node: u64, generator: Box<dyn PayloadGenerator>) -> Setup {
        let roster: Arc<dyn Roster> = Arc::new(StaticRoster::uniform(3).unwrap());
        let quorum = Arc::new(QuorumGate::new(roster));
        let governor = SubmissionGovernor::new(
            GovernorConfig::default(),
            quorum,
            Arc::new(FixedNetworkMetrics::new()),
            Instant::now(),
        );
        let engine = Arc::new(RecordingEngine::new());
        let (tx, rx) = channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let orchestrator = Orchestrator::new(
            NodeId(node),
            generator,
            governor,
            engine.clone(),
            rx,
            Arc::clone(&stop),
        )
        .with_options(
            SubmitOptions {
                retry_delay_ms: 1,
                sleep_after_test_ms: 0,
                ..Default::default()
            },
            node as usize,
        );
        Setup {
            orchestrator,
            engine,
            signals: tx,
            stop,
        }
    }

    fn fixed(node: u64, limit: u64) -> Box<dyn PayloadGenerator> {
        Box::new(
            WeightedPayloadGenerator::new(
                FactoryConfig::new(NodeId(node)).with_signing(false),
                PayloadMode::Fixed {
                    payload_type: PayloadType::EntityCreate,
                    size: 0,
                },
                42,
            )
            .with_limit(limit),
        )
    }

    fn control_of(bytes: &[u8]) -> Option<ControlType> {
        decode_transaction(bytes).unwrap().control_type()
    }

    fn is_freeze(bytes: &[u8]) -> bool {
        let tx = decode_transaction(bytes).unwrap();
        matches!(tx.body, TransactionBody::Freeze { .. })
    }

    #[test]
    fn test_exhaustion_sends_enter_validation_once() {
        let Setup {
            mut orchestrator,
            engine,
            ..
        } = setup(1, fixed(1, 3));
        for _ in 0..10 {
            orchestrator.step(Instant::now());
        }
        assert_eq!(orchestrator.outcome().submitted, 3);
        assert!(orchestrator.outcome().exhausted);
        assert!(!orchestrator.is_generating());

        let submitted = engine.submitted();
        assert_eq!(submitted.len(), 4);
        assert_eq!(control_of(&submitted[3]), Some(ControlType::EnterValidation));
        assert_eq!(orchestrator.outcome().controls_sent, vec![ControlType::EnterValidation]);
    }

    #[test]
    fn test_vetoed_payload_is_retried_not_lost() {
        let Setup {
            mut orchestrator,
            engine,
            ..
        } = setup(1, fixed(1, 2));
        engine.set_rejecting(true);
        orchestrator.step(Instant::now());
        orchestrator.step(Instant::now());
        assert_eq!(orchestrator.outcome().vetoed, 2);
        assert!(engine.is_empty());

        engine.set_rejecting(false);
        orchestrator.step(Instant::now());
        orchestrator.step(Instant::now());
        assert_eq!(orchestrator.outcome().submitted, 2);
        assert_eq!(engine.len(), 2, "the held payload went out first, nothing dropped");
    }

    #[test]
    fn test_validation_phase_signals() {
        let Setup {
            mut orchestrator,
            engine,
            ..
        } = setup(0, fixed(0, 100));
        let ts = ConsensusTimestamp::from_secs(5);

        orchestrator.on_signal(PhaseSignal::QuorumReached {
            control: ControlType::EnterValidation,
            timestamp: ts,
        });
        assert!(!orchestrator.is_generating(), "generation stops for validation");
        assert_eq!(control_of(&engine.submitted()[0]), Some(ControlType::ExitValidation));

        orchestrator.on_signal(PhaseSignal::QuorumReached {
            control: ControlType::ExitValidation,
            timestamp: ts,
        });
        assert!(orchestrator.outcome().validation_done);
        assert!(orchestrator.outcome().freeze_sent, "leader schedules the freeze");
        assert!(is_freeze(&engine.submitted()[1]));

        // Finishes right away with a zero grace period.
        assert_eq!(orchestrator.run().submitted, 0);
    }

    #[test]
    fn test_non_leader_does_not_freeze() {
        let Setup {
            mut orchestrator,
            engine,
            ..
        } = setup(2, fixed(2, 1));
        orchestrator.on_signal(PhaseSignal::QuorumReached {
            control: ControlType::ExitValidation,
            timestamp: ConsensusTimestamp::from_secs(1),
        });
        assert!(!orchestrator.outcome().freeze_sent);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_sync_stage_round_trip() {
        let schedule = SequentialSchedule::new(
            FactoryConfig::new(NodeId(1)).with_signing(false),
            vec![
                Stage::payload(PayloadType::Bytes, 0, 1),
                Stage::test_sync(),
                Stage::payload(PayloadType::Bytes, 0, 1),
            ],
            42,
        );
        let Setup {
            mut orchestrator,
            engine,
            ..
        } = setup(1, Box::new(schedule));

        orchestrator.step(Instant::now());
        orchestrator.step(Instant::now());
        assert_eq!(control_of(&engine.submitted()[1]), Some(ControlType::EnterSync));

        orchestrator.on_signal(PhaseSignal::QuorumReached {
            control: ControlType::EnterSync,
            timestamp: ConsensusTimestamp::from_secs(1),
        });
        assert_eq!(control_of(&engine.submitted()[2]), Some(ControlType::ExitSync));

        orchestrator.step(Instant::now());
        assert_eq!(orchestrator.outcome().submitted, 2);
    }

    #[test]
    fn test_single_node_submit_idles_others() {
        let Setup {
            orchestrator,
            engine,
            signals,
            stop,
        } = setup(1, fixed(1, 5));
        let orchestrator = orchestrator.with_options(
            SubmitOptions {
                single_node_submit: Some(NodeId(0)),
                ..Default::default()
            },
            1,
        );
        assert!(!orchestrator.is_generating());

        stop.store(true, Ordering::SeqCst);
        drop(signals);
        let outcome = orchestrator.run();
        assert_eq!(outcome.submitted, 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_run_ends_when_delivery_goes_away() {
        let Setup {
            orchestrator,
            signals,
            ..
        } = setup(1, fixed(1, 0));
        drop(signals);
        let outcome = orchestrator.run();
        assert!(outcome.exhausted, "limit 0 exhausts immediately");
    }
}
