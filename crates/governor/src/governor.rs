//! The submission governor.

use crate::config::{GoalMetric, GovernorConfig, SubmitGoal};
use crate::metrics::SubmissionMetrics;
use crate::throttle::{ThrottleScope, ThrottleSet};
use replaygate_core::{NetworkMetrics, OrderingEngine};
use replaygate_quorum::QuorumGate;
use replaygate_types::{ControlType, PayloadType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Veto {
    /// The global force-pause flag is set.
    ForcePaused,
    /// Inside the pause-after-N window.
    PauseWindow,
    /// An ENTER control type reached quorum and its EXIT has not.
    Quorum(ControlType),
    /// The goal metric is past its threshold.
    Goal { metric: GoalMetric, value: f64 },
    /// A token bucket is empty.
    Throttled(ThrottleScope),
    /// The ordering engine did not take the bytes.
    EngineBusy,
}

/// Decides whether this node may submit another transaction.
///
/// Gates are evaluated in order: force-pause, pause-after-N, quorum, goal.
/// [`try_submit`](Self::try_submit) additionally consults the throttles and
/// the ordering engine. Any veto means the caller keeps the payload and
/// retries it later.
pub struct SubmissionGovernor {
    config: GovernorConfig,
    goal: SubmitGoal,
    customized_tps: Option<f64>,
    force_pause: Arc<AtomicBool>,
    quorum: Arc<QuorumGate>,
    network: Arc<dyn NetworkMetrics>,
    metrics: Arc<SubmissionMetrics>,
    throttle: ThrottleSet,
    /// Last fired epoch observed per control type.
    seen_epochs: [u64; 4],
    /// Indexed by the ENTER type that paused submission.
    paused_by: [bool; 4],
    /// End of the pause-after-N window once it has started.
    pause_until: Option<Instant>,
}

impl std::fmt::Debug for SubmissionGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionGovernor")
            .field("goal", &self.goal)
            .field("customized_tps", &self.customized_tps)
            .field("force_pause", &self.force_pause.load(Ordering::Relaxed))
            .field("paused_by", &self.paused_by)
            .field("pause_until", &self.pause_until)
            .finish()
    }
}

impl SubmissionGovernor {
    /// Create a governor. The first measurement cycle starts at `now`.
    pub fn new(
        config: GovernorConfig,
        quorum: Arc<QuorumGate>,
        network: Arc<dyn NetworkMetrics>,
        now: Instant,
    ) -> Self {
        let metrics = Arc::new(SubmissionMetrics::new(now, config.min_window()));
        let throttle = ThrottleSet::new(&config.throttle, now);
        let seen_epochs = ControlType::ALL.map(|kind| quorum.fired_epoch(kind));
        Self {
            goal: config.goal,
            config,
            customized_tps: None,
            force_pause: Arc::new(AtomicBool::new(false)),
            quorum,
            network,
            metrics,
            throttle,
            seen_epochs,
            paused_by: [false; 4],
            pause_until: None,
        }
    }

    /// Shared force-pause flag. Setting it stops all goal-governed submission.
    pub fn force_pause_handle(&self) -> Arc<AtomicBool> {
        self.force_pause.clone()
    }

    pub fn set_force_pause(&self, paused: bool) {
        self.force_pause.store(paused, Ordering::SeqCst);
    }

    pub fn is_force_paused(&self) -> bool {
        self.force_pause.load(Ordering::SeqCst)
    }

    /// Change the goal and start a new measurement cycle.
    pub fn set_goal(&mut self, goal: SubmitGoal, now: Instant) {
        info!(metric = ?goal.metric, threshold = goal.threshold, "Submission goal changed");
        self.goal = goal;
        self.metrics.reset(now);
    }

    pub fn goal(&self) -> SubmitGoal {
        self.goal
    }

    /// Override the goal with a fixed TPS, e.g. for one sequential stage.
    /// `None` restores the configured goal. Starts a new measurement cycle.
    pub fn set_customized_tps(&mut self, tps: Option<f64>, now: Instant) {
        let tps = tps.filter(|t| t.is_finite() && *t > 0.0);
        if tps != self.customized_tps {
            debug!(?tps, "Customized TPS changed");
            self.customized_tps = tps;
            self.metrics.reset(now);
        }
    }

    /// Local submission metrics.
    pub fn metrics(&self) -> &Arc<SubmissionMetrics> {
        &self.metrics
    }

    /// Whether a quorum-triggered pause is in effect.
    pub fn is_paused_by_quorum(&self) -> bool {
        self.paused_by.iter().any(|p| *p)
    }

    /// Re-read the quorum gate after it was restored from a snapshot.
    ///
    /// Restored epochs may be lower than the ones already seen, so the
    /// edge detector starts over and the pause latch is derived from the
    /// restored counts: an ENTER type that fired more often than its EXIT
    /// keeps submission paused.
    pub fn resync_quorum(&mut self) {
        for kind in ControlType::ALL {
            self.seen_epochs[kind.index()] = self.quorum.fired_epoch(kind);
        }
        for kind in ControlType::ALL.into_iter().filter(|k| k.is_enter()) {
            self.paused_by[kind.index()] =
                self.seen_epochs[kind.index()] > self.seen_epochs[kind.counterpart().index()];
        }
        info!(paused = self.is_paused_by_quorum(), "Governor resynced with restored quorum");
    }

    /// Whether another transaction may be submitted right now.
    pub fn can_submit_more(&mut self) -> bool {
        self.can_submit_more_at(Instant::now())
    }

    /// [`can_submit_more`](Self::can_submit_more) at an explicit instant.
    pub fn can_submit_more_at(&mut self, now: Instant) -> bool {
        match self.check(now) {
            Ok(()) => true,
            Err(veto) => {
                trace!(?veto, "Submission vetoed");
                false
            }
        }
    }

    /// Evaluate every gate except the throttles.
    pub fn check(&mut self, now: Instant) -> Result<(), Veto> {
        if self.is_force_paused() {
            return Err(Veto::ForcePaused);
        }
        self.check_pause_window(now)?;
        self.observe_quorum(now);
        if let Some(kind) = ControlType::ALL
            .into_iter()
            .find(|kind| self.paused_by[kind.index()])
        {
            return Err(Veto::Quorum(kind));
        }
        self.check_goal(now)
    }

    fn check_pause_window(&mut self, now: Instant) -> Result<(), Veto> {
        let Some(pause) = self.config.pause_after else {
            return Ok(());
        };
        match self.pause_until {
            Some(until) if now < until => Err(Veto::PauseWindow),
            Some(_) => Ok(()),
            None if self.metrics.total_transactions() >= pause.transactions => {
                let until = now + pause.pause();
                info!(
                    submitted = self.metrics.total_transactions(),
                    pause_secs = pause.pause_secs,
                    "Pausing submission"
                );
                self.pause_until = Some(until);
                // The pause should not drag down the next cycle's average.
                self.metrics.reset(until);
                if now < until {
                    Err(Veto::PauseWindow)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    /// Latch pauses on ENTER firings and release them on the matching EXIT.
    fn observe_quorum(&mut self, now: Instant) {
        for kind in ControlType::ALL {
            let epoch = self.quorum.fired_epoch(kind);
            if epoch <= self.seen_epochs[kind.index()] {
                continue;
            }
            self.seen_epochs[kind.index()] = epoch;

            if kind.is_enter() {
                info!(control = %kind, epoch, "Submission paused by quorum");
                self.paused_by[kind.index()] = true;
            } else {
                info!(control = %kind, epoch, "Submission resumed by quorum");
                self.paused_by[kind.counterpart().index()] = false;
                self.metrics.reset(now);
            }
        }
    }

    /// Compare the goal metric against its threshold.
    ///
    /// Local rates are cumulative over the current measurement cycle: total
    /// bytes or transactions since the cycle started, divided by the elapsed
    /// time floored at the minimum window. A burst therefore keeps blocking
    /// until enough time passes to average it below the goal.
    fn check_goal(&self, now: Instant) -> Result<(), Veto> {
        if let Some(tps) = self.customized_tps {
            let value = self.metrics.tps(now);
            return if value < tps {
                Ok(())
            } else {
                Err(Veto::Goal {
                    metric: GoalMetric::TransactionsPerSec,
                    value,
                })
            };
        }

        let metric = self.goal.metric;
        let value = match metric {
            GoalMetric::Unlimited => return Ok(()),
            GoalMetric::BytesPerSec => self.metrics.bytes_per_sec(now),
            GoalMetric::TransactionsPerSec => self.metrics.tps(now),
            GoalMetric::EventsPerSec => self.network.events_per_sec(),
            GoalMetric::RoundsPerSec => self.network.rounds_per_sec(),
            GoalMetric::TransactionsPerEvent => self.network.transactions_per_event(),
            GoalMetric::C2cLatency => self.network.c2c_latency().as_secs_f64(),
        };
        if metric.sense().allows(value, self.goal.threshold) {
            Ok(())
        } else {
            Err(Veto::Goal { metric, value })
        }
    }

    /// Offer `bytes` to the ordering engine if every gate allows it.
    ///
    /// Returns true when the engine accepted the bytes; local counters are
    /// updated only then.
    pub fn try_submit(
        &mut self,
        engine: &dyn OrderingEngine,
        bytes: Vec<u8>,
        payload_type: PayloadType,
    ) -> bool {
        self.try_submit_at(engine, bytes, payload_type, Instant::now())
            .is_ok()
    }

    /// [`try_submit`](Self::try_submit) at an explicit instant, with the veto.
    pub fn try_submit_at(
        &mut self,
        engine: &dyn OrderingEngine,
        bytes: Vec<u8>,
        payload_type: PayloadType,
        now: Instant,
    ) -> Result<(), Veto> {
        self.check(now)?;
        self.throttle
            .check(payload_type, now)
            .map_err(Veto::Throttled)?;
        self.submit_unchecked(engine, bytes, payload_type)
    }

    /// Submit without consulting any gate. Used for control and freeze
    /// transactions, which must get through while submission is paused.
    pub fn submit_unchecked(
        &self,
        engine: &dyn OrderingEngine,
        bytes: Vec<u8>,
        payload_type: PayloadType,
    ) -> Result<(), Veto> {
        let len = bytes.len();
        if engine.create_transaction(bytes) {
            self.metrics.record(payload_type, len);
            Ok(())
        } else {
            Err(Veto::EngineBusy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimit, ThrottleConfig};
    use replaygate_core::{FixedNetworkMetrics, RecordingEngine};
    use replaygate_types::{ConsensusTimestamp, ControlAction, PayloadCategory, StaticRoster};
    use std::time::Duration;

    fn setup(config: GovernorConfig) -> (SubmissionGovernor, Arc<QuorumGate>, Arc<FixedNetworkMetrics>, Instant) {
        let roster = Arc::new(StaticRoster::uniform(3).unwrap());
        let gate = Arc::new(QuorumGate::new(roster).with_auto_reset(true));
        let network = Arc::new(FixedNetworkMetrics::new());
        let start = Instant::now();
        let governor = SubmissionGovernor::new(config, gate.clone(), network.clone(), start);
        (governor, gate, network, start)
    }

    fn fire(gate: &QuorumGate, kind: ControlType) {
        for node in 0..2 {
            gate.record(node, ControlAction::new(ConsensusTimestamp(1_000), kind));
        }
    }

    #[test]
    fn test_bytes_goal_blocks_until_window_elapses() {
        let config = GovernorConfig::default().with_goal(SubmitGoal::bytes_per_sec(1000.0));
        let (mut governor, _, _, start) = setup(config);
        let engine = RecordingEngine::new();

        assert!(governor.can_submit_more_at(start));
        let t = start + Duration::from_millis(200);
        assert_eq!(governor.try_submit_at(&engine, vec![0; 1000], PayloadType::Bytes, t), Ok(()));
        // 1000 B in the first second is exactly at the goal.
        assert!(!governor.can_submit_more_at(t));

        // Force 2000 B into the same second.
        governor
            .submit_unchecked(&engine, vec![0; 1000], PayloadType::Bytes)
            .unwrap();
        assert!(!governor.can_submit_more_at(start + Duration::from_millis(900)));
        assert!(
            !governor.can_submit_more_at(start + Duration::from_secs(1)),
            "2000 B over exactly 1 s is twice the goal"
        );
        assert!(
            !governor.can_submit_more_at(start + Duration::from_secs(2)),
            "2000 B over 2 s is still at the goal"
        );
        assert!(governor.can_submit_more_at(start + Duration::from_millis(2_500)));
    }

    #[test]
    fn test_force_pause_is_first_gate() {
        let (mut governor, _, _, start) = setup(GovernorConfig::default());
        let handle = governor.force_pause_handle();
        handle.store(true, Ordering::SeqCst);
        assert_eq!(governor.check(start), Err(Veto::ForcePaused));
        governor.set_force_pause(false);
        assert_eq!(governor.check(start), Ok(()));
    }

    #[test]
    fn test_pause_after_n_window() {
        let config = GovernorConfig::default().with_pause_after(2, Duration::from_secs(5));
        let (mut governor, _, _, start) = setup(config);
        let engine = RecordingEngine::new();

        for _ in 0..2 {
            assert!(governor
                .try_submit_at(&engine, vec![1], PayloadType::Dummy, start)
                .is_ok());
        }
        assert_eq!(governor.check(start), Err(Veto::PauseWindow));
        assert_eq!(
            governor.check(start + Duration::from_secs(4)),
            Err(Veto::PauseWindow)
        );
        assert_eq!(governor.check(start + Duration::from_secs(5)), Ok(()));
        // The window is used once.
        assert_eq!(governor.check(start + Duration::from_secs(6)), Ok(()));
    }

    #[test]
    fn test_enter_quorum_pauses_until_exit() {
        let config = GovernorConfig::default().with_goal(SubmitGoal::transactions_per_sec(100.0));
        let (mut governor, gate, _, start) = setup(config);
        let engine = RecordingEngine::new();
        governor
            .try_submit_at(&engine, vec![1], PayloadType::Dummy, start)
            .unwrap();

        fire(&gate, ControlType::EnterSync);
        assert_eq!(governor.check(start), Err(Veto::Quorum(ControlType::EnterSync)));

        // First EXIT vote moves ENTER back to Idle but is not quorum yet.
        gate.record(0, ControlAction::new(ConsensusTimestamp(2_000), ControlType::ExitSync));
        assert!(!gate.has_quorum(ControlType::EnterSync));
        assert_eq!(governor.check(start), Err(Veto::Quorum(ControlType::EnterSync)));

        gate.record(1, ControlAction::new(ConsensusTimestamp(2_000), ControlType::ExitSync));
        let later = start + Duration::from_secs(1);
        assert_eq!(governor.check(later), Ok(()));
        assert_eq!(
            governor.metrics().cycle_transactions(),
            0,
            "exit quorum starts a new measurement cycle"
        );
        assert_eq!(governor.metrics().total_transactions(), 1);
    }

    #[test]
    fn test_firing_between_polls_is_not_missed() {
        let (mut governor, gate, _, start) = setup(GovernorConfig::default());
        fire(&gate, ControlType::EnterValidation);
        // A vote for another type re-arms ENTER before the governor polls.
        gate.record(2, ControlAction::new(ConsensusTimestamp(3_000), ControlType::EnterSync));
        assert!(!gate.has_quorum(ControlType::EnterValidation));
        assert_eq!(
            governor.check(start),
            Err(Veto::Quorum(ControlType::EnterValidation))
        );
    }

    #[test]
    fn test_resync_after_restore() {
        let (mut governor, gate, _, start) = setup(GovernorConfig::default());
        fire(&gate, ControlType::EnterValidation);
        fire(&gate, ControlType::ExitValidation);
        assert_eq!(governor.check(start), Ok(()));

        // A restored tally starts the epochs over.
        gate.reset();
        governor.resync_quorum();
        fire(&gate, ControlType::EnterValidation);
        assert_eq!(
            governor.check(start),
            Err(Veto::Quorum(ControlType::EnterValidation)),
            "firing after a restore is seen"
        );

        // Restoring a state where ENTER fired without its EXIT keeps the pause.
        let saved = gate.result();
        gate.reset();
        governor.resync_quorum();
        assert!(!governor.is_paused_by_quorum());
        gate.restore(saved);
        governor.resync_quorum();
        assert!(governor.is_paused_by_quorum());
    }

    #[test]
    fn test_network_goals() {
        let config = GovernorConfig::default().with_goal(SubmitGoal::new(GoalMetric::C2cLatency, 2.0));
        let (mut governor, _, network, start) = setup(config);

        network.set_c2c_latency(Duration::from_millis(1_500));
        assert!(governor.can_submit_more_at(start));
        network.set_c2c_latency(Duration::from_secs(3));
        assert!(!governor.can_submit_more_at(start));

        governor.set_goal(SubmitGoal::new(GoalMetric::RoundsPerSec, 5.0), start);
        network.set_rounds_per_sec(4.0);
        assert!(!governor.can_submit_more_at(start), "rounds/sec is a floor");
        network.set_rounds_per_sec(6.0);
        assert!(governor.can_submit_more_at(start));

        governor.set_goal(SubmitGoal::new(GoalMetric::EventsPerSec, 50.0), start);
        network.set_events_per_sec(80.0);
        assert!(matches!(
            governor.check(start),
            Err(Veto::Goal {
                metric: GoalMetric::EventsPerSec,
                ..
            })
        ));
        network.set_events_per_sec(20.0);
        assert!(governor.can_submit_more_at(start), "events/sec is a ceiling");

        governor.set_goal(SubmitGoal::new(GoalMetric::TransactionsPerEvent, 10.0), start);
        network.set_transactions_per_event(12.0);
        assert!(matches!(
            governor.check(start),
            Err(Veto::Goal {
                metric: GoalMetric::TransactionsPerEvent,
                ..
            })
        ));
    }

    #[test]
    fn test_customized_tps_overrides_goal() {
        let (mut governor, _, _, start) = setup(GovernorConfig::default());
        let engine = RecordingEngine::new();
        governor.set_customized_tps(Some(2.0), start);

        for _ in 0..2 {
            governor
                .try_submit_at(&engine, vec![0], PayloadType::Bytes, start)
                .unwrap();
        }
        assert!(!governor.can_submit_more_at(start));
        governor.set_customized_tps(None, start);
        assert!(governor.can_submit_more_at(start));
    }

    #[test]
    fn test_throttle_and_engine_vetoes() {
        let throttle = ThrottleConfig::default()
            .with_category_limit(PayloadCategory::Tree, RateLimit::new(1, 1));
        let (mut governor, _, _, start) = setup(GovernorConfig::default().with_throttle(throttle));
        let engine = RecordingEngine::new();

        assert!(governor
            .try_submit_at(&engine, vec![0], PayloadType::TreeCreate, start)
            .is_ok());
        assert_eq!(
            governor.try_submit_at(&engine, vec![0], PayloadType::TreeUpdate, start),
            Err(Veto::Throttled(ThrottleScope::Category(PayloadCategory::Tree)))
        );

        engine.set_rejecting(true);
        assert_eq!(
            governor.try_submit_at(&engine, vec![0], PayloadType::Dummy, start),
            Err(Veto::EngineBusy)
        );
        assert_eq!(governor.metrics().total_transactions(), 1, "rejected bytes are not counted");
    }
}
