//! Weighted-majority gate over control votes.

use crate::result::{QuorumPhase, QuorumResult};
use parking_lot::Mutex;
use replaygate_types::{ControlAction, ControlType, Roster};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback invoked once per firing.
pub type QuorumListener = Arc<dyn Fn(&ControlAction) + Send + Sync>;

/// Outcome of recording one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Vote counted; quorum not yet reached.
    Counted { weight: u64 },
    /// The node already voted for this type in the current epoch.
    AlreadyVoted,
    /// This vote completed the quorum.
    QuorumReached(ControlAction),
    /// The type already fired and the gate does not auto-reset.
    IgnoredAfterQuorum,
    /// The roster index is out of range.
    UnknownNode,
}

/// Tracks control votes and fires when a strict weighted majority agrees.
///
/// Each control type moves `Idle -> Armed -> Fired`. Without auto-reset
/// `Fired` is terminal. With auto-reset the tally is cleared at the moment
/// of firing; the type stays `Fired` until a vote for a different type
/// arrives, at which point every other fired type returns to `Idle` and can
/// be reached again.
///
/// All mutation happens under one lock. `has_quorum` reads an atomic
/// mirror of the phases and never blocks.
pub struct QuorumGate {
    roster: Arc<dyn Roster>,
    auto_reset: bool,
    inner: Mutex<QuorumResult>,
    phases: [AtomicU8; 4],
    epochs: [AtomicU64; 4],
    listeners: Mutex<Vec<QuorumListener>>,
}

impl std::fmt::Debug for QuorumGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumGate")
            .field("roster_size", &self.roster.size())
            .field("auto_reset", &self.auto_reset)
            .field("result", &*self.inner.lock())
            .finish()
    }
}

impl QuorumGate {
    /// Create a gate for a roster. Auto-reset is off.
    pub fn new(roster: Arc<dyn Roster>) -> Self {
        let result = QuorumResult::new(roster.size(), roster.total_weight());
        Self {
            roster,
            auto_reset: false,
            inner: Mutex::new(result),
            phases: Default::default(),
            epochs: Default::default(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Enable or disable auto-reset.
    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    /// Whether the gate re-arms after firing.
    pub fn auto_reset(&self) -> bool {
        self.auto_reset
    }

    /// Register a callback fired once per quorum, after the lock is released.
    pub fn on_quorum<F>(&self, listener: F)
    where
        F: Fn(&ControlAction) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Record a vote from the node at `node_index` in the roster.
    pub fn record(&self, node_index: usize, action: ControlAction) -> RecordOutcome {
        if node_index >= self.roster.size() {
            warn!(node_index, control = %action.kind, "Control vote from unknown roster index");
            return RecordOutcome::UnknownNode;
        }
        let weight = self.roster.weight_at(node_index);

        let outcome = {
            let mut result = self.inner.lock();

            if self.auto_reset {
                self.rearm_others(&mut result, action.kind);
            }

            let tally = result.tally_mut(action.kind);
            if tally.phase == QuorumPhase::Fired {
                debug!(node_index, control = %action.kind, "Vote after quorum ignored");
                return RecordOutcome::IgnoredAfterQuorum;
            }
            if !tally.voters.insert(node_index) {
                return RecordOutcome::AlreadyVoted;
            }
            tally.weight = tally.weight.saturating_add(weight);

            if self.roster.has_quorum(tally.weight) {
                tally.phase = QuorumPhase::Fired;
                tally.epoch += 1;
                tally.fired_by = Some(action);
                info!(
                    control = %action.kind,
                    weight = tally.weight,
                    voters = tally.voters.len(),
                    epoch = tally.epoch,
                    "Control quorum reached"
                );
                if self.auto_reset {
                    tally.voters.clear();
                    tally.weight = 0;
                }
                self.publish_phase(action.kind, QuorumPhase::Fired);
                self.epochs[action.kind.index()].store(tally.epoch, Ordering::Release);
                RecordOutcome::QuorumReached(action)
            } else {
                tally.phase = QuorumPhase::Armed;
                let weight = tally.weight;
                self.publish_phase(action.kind, QuorumPhase::Armed);
                RecordOutcome::Counted { weight }
            }
        };

        if let RecordOutcome::QuorumReached(action) = outcome {
            let listeners = self.listeners.lock().clone();
            for listener in listeners {
                listener(&action);
            }
        }
        outcome
    }

    fn rearm_others(&self, result: &mut QuorumResult, incoming: ControlType) {
        for kind in ControlType::ALL {
            if kind == incoming {
                continue;
            }
            let tally = result.tally_mut(kind);
            if tally.phase == QuorumPhase::Fired {
                tally.phase = QuorumPhase::Idle;
                tally.voters.clear();
                tally.weight = 0;
                self.publish_phase(kind, QuorumPhase::Idle);
            }
        }
    }

    fn publish_phase(&self, kind: ControlType, phase: QuorumPhase) {
        self.phases[kind.index()].store(phase.to_u8(), Ordering::Release);
    }

    /// Whether a control type currently has quorum. Never blocks.
    pub fn has_quorum(&self, kind: ControlType) -> bool {
        self.phase(kind) == QuorumPhase::Fired
    }

    /// Current phase of a control type. Never blocks.
    pub fn phase(&self, kind: ControlType) -> QuorumPhase {
        QuorumPhase::from_u8(self.phases[kind.index()].load(Ordering::Acquire))
    }

    /// Number of times a control type has fired. Never blocks.
    ///
    /// Pollers compare this against the last value they saw, so a firing is
    /// observed even if auto-reset already moved the type back to `Idle`.
    pub fn fired_epoch(&self, kind: ControlType) -> u64 {
        self.epochs[kind.index()].load(Ordering::Acquire)
    }

    /// Deep copy of the current tally.
    pub fn result(&self) -> QuorumResult {
        self.inner.lock().clone()
    }

    /// Replace the tally, e.g. after loading a snapshot on reconnect.
    pub fn restore(&self, result: QuorumResult) {
        let mut inner = self.inner.lock();
        if result.roster_size() != self.roster.size() {
            warn!(
                saved = result.roster_size(),
                current = self.roster.size(),
                "Restored quorum result was built for a different roster size"
            );
        }
        for kind in ControlType::ALL {
            self.publish_phase(kind, result.phase(kind));
            self.epochs[kind.index()].store(result.epoch(kind), Ordering::Release);
        }
        *inner = result;
    }

    /// Clear every tally.
    pub fn reset(&self) {
        self.restore(QuorumResult::new(
            self.roster.size(),
            self.roster.total_weight(),
        ));
    }
}
