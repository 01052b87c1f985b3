//! The replay state machine.
//!
//! Every node replays the same ordered rounds through its own
//! [`ReplicatedStateMachine`]. Signatures of a round are verified in
//! parallel, then transactions are applied strictly in delivery order:
//!
//! ```text
//!  Round ──► decode + verify (rayon) ──► for each tx, in order:
//!                                          purge expired entities
//!                                          apply to entity map  ◄──► expected map
//!                                          control votes ──► QuorumGate
//!            publish snapshot ◄────────────┘
//! ```
//!
//! Side effects (exports, freezes, follow-up control transactions) are
//! returned as [`Action`]s for the runner.

use crate::arena::SnapshotArena;
use crate::expected::{DivergenceReason, DivergenceSummary, ExpectedMap};
use crate::expiration::ExpirationQueue;
use crate::limiter::{ThresholdLimiter, DEFAULT_LOG_THRESHOLD};
use crate::snapshot::{MutableState, StateSnapshot};
use hdrhistogram::Histogram;
use rayon::prelude::*;
use replaygate_core::{Action, Event, Round, StateMachine, SystemSignature};
use replaygate_quorum::{QuorumGate, RecordOutcome};
use replaygate_types::{
    decode_envelope, ActivityKind, CodecError, ConsensusTimestamp, ControlAction, ControlType,
    EntityKey, EntityKind, LifecycleOp, NodeId, PayloadType, Roster, SignatureStatus,
    SimpleAction, Transaction, TransactionBody,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for one node's state machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// The node this machine runs on.
    pub node: NodeId,
    /// Lifetime of records appended to queue entities.
    pub record_ttl: Duration,
    /// Occurrences logged per error class before suppression.
    pub log_threshold: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            node: NodeId(0),
            record_ttl: Duration::from_secs(60),
            log_threshold: DEFAULT_LOG_THRESHOLD,
        }
    }
}

impl MachineConfig {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            ..Default::default()
        }
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }
}

/// Counters for recoverable apply-path events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub rounds: u64,
    pub applied: u64,
    pub decode_errors: u64,
    pub timestamp_violations: u64,
    pub seq_mismatches: u64,
    /// Deliberately invalid signatures that were rejected as intended.
    pub expected_invalid: u64,
    /// Operations that failed on both the entity map and the expected map.
    pub handle_failed: u64,
    /// Activities ignored because they did not come from node 0.
    pub ignored_activities: u64,
    pub system_invalid_signatures: u64,
    /// Control votes dropped because their signature failed to verify.
    pub invalid_control_votes: u64,
}

/// Expiration purge statistics.
#[derive(Debug, Clone)]
pub struct PurgeStats {
    pub runs: u64,
    pub entities: u64,
    pub records: u64,
    latency_micros: Option<Histogram<u64>>,
}

impl Default for PurgeStats {
    fn default() -> Self {
        Self {
            runs: 0,
            entities: 0,
            records: 0,
            // Construction only fails for more than 5 significant figures.
            latency_micros: Histogram::new(3).ok(),
        }
    }
}

impl PurgeStats {
    fn record(&mut self, entities: u64, records: u64, elapsed: Duration) {
        self.runs += 1;
        self.entities += entities;
        self.records += records;
        if let Some(histogram) = self.latency_micros.as_mut() {
            let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
            histogram.saturating_record(micros.max(1));
        }
    }

    /// Purge latency at quantile `q` (0.0..=1.0).
    pub fn latency_at(&self, q: f64) -> Option<Duration> {
        self.latency_micros
            .as_ref()
            .filter(|h| !h.is_empty())
            .map(|h| Duration::from_micros(h.value_at_quantile(q)))
    }
}

/// Versioned entity state plus the replay logic that mutates it.
pub struct ReplicatedStateMachine {
    config: MachineConfig,
    roster: Arc<dyn Roster>,
    state: MutableState,
    arena: Arc<SnapshotArena>,
    quorum: Arc<QuorumGate>,
    expected: ExpectedMap,
    expiration: Arc<ExpirationQueue>,
    limiter: Arc<ThresholdLimiter>,
    stats: ApplyStats,
    purge: PurgeStats,
    now: Duration,
}

impl std::fmt::Debug for ReplicatedStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedStateMachine")
            .field("node", &self.config.node)
            .field("version", &self.state.version())
            .field("entities", &self.state.entity_count())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ReplicatedStateMachine {
    /// Create a machine at genesis.
    pub fn new(config: MachineConfig, roster: Arc<dyn Roster>, quorum: Arc<QuorumGate>) -> Self {
        let mut state = MutableState::genesis(roster.size(), roster.total_weight());
        let arena = Arc::new(SnapshotArena::new(state.publish()));
        let limiter = Arc::new(ThresholdLimiter::new(config.log_threshold));
        Self {
            config,
            roster,
            state,
            arena,
            quorum,
            expected: ExpectedMap::new(),
            expiration: Arc::new(ExpirationQueue::new()),
            limiter,
            stats: ApplyStats::default(),
            purge: PurgeStats::default(),
            now: Duration::ZERO,
        }
    }

    pub fn node(&self) -> NodeId {
        self.config.node
    }

    /// Shared pointer to published snapshots.
    pub fn arena(&self) -> &Arc<SnapshotArena> {
        &self.arena
    }

    pub fn quorum(&self) -> &Arc<QuorumGate> {
        &self.quorum
    }

    pub fn expected(&self) -> &ExpectedMap {
        &self.expected
    }

    pub fn expiration(&self) -> &Arc<ExpirationQueue> {
        &self.expiration
    }

    pub fn limiter(&self) -> &Arc<ThresholdLimiter> {
        &self.limiter
    }

    pub fn stats(&self) -> &ApplyStats {
        &self.stats
    }

    pub fn purge_stats(&self) -> &PurgeStats {
        &self.purge
    }

    /// The working (unpublished) state.
    pub fn state(&self) -> &MutableState {
        &self.state
    }

    pub fn divergences(&self) -> DivergenceSummary {
        self.expected.divergences()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Rounds
    // ═══════════════════════════════════════════════════════════════════════

    fn on_round(&mut self, round: Round) -> Vec<Action> {
        let decoded: Vec<Result<(Transaction, SignatureStatus), CodecError>> = round
            .transactions
            .par_iter()
            .map(|delivered| decode_and_verify(&delivered.payload))
            .collect();

        let mut actions = Vec::new();
        for (delivered, decoded) in round.transactions.iter().zip(decoded) {
            match decoded {
                Ok((tx, status)) => {
                    actions.extend(self.apply(
                        &tx,
                        status,
                        delivered.creator,
                        delivered.consensus_timestamp,
                    ));
                }
                Err(error) => {
                    self.stats.decode_errors += 1;
                    let creator = delivered.creator;
                    self.limiter.handle(error.class(), || {
                        warn!(error = %error, creator = %creator, "Failed to decode transaction");
                    });
                }
            }
        }

        self.stats.rounds += 1;
        self.publish();
        debug!(
            node = %self.config.node,
            round = %round.number,
            transactions = round.transactions.len(),
            version = self.state.version(),
            "Applied round"
        );
        actions
    }

    fn on_system_signatures(&mut self, signatures: Vec<SystemSignature>) {
        for signature in signatures {
            if signature.status == SignatureStatus::Invalid {
                self.stats.system_invalid_signatures += 1;
                self.limiter.handle("system_signature", || {
                    warn!(creator = %signature.creator, "System transaction with invalid signature");
                });
            }
        }
    }

    /// Freeze the working state and make it the latest snapshot.
    pub fn publish(&mut self) {
        self.arena.publish(self.state.publish());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transactions
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply one transaction at its consensus timestamp.
    ///
    /// Never fails: every problem is logged, counted, or flagged on the
    /// affected entity.
    pub fn apply(
        &mut self,
        tx: &Transaction,
        signature: SignatureStatus,
        creator: NodeId,
        ts: ConsensusTimestamp,
    ) -> Vec<Action> {
        self.check_timestamp(ts);
        if tx.control_type() != Some(ControlType::ExitValidation) {
            self.purge_expired(ts);
        }

        let creator_index = self.roster.index_of(creator);
        let mut actions = Vec::new();
        match &tx.body {
            TransactionBody::Bytes { seq, .. } => {
                if let Err(expected) = self.state.check_seq(tx.origin, *seq) {
                    self.stats.seq_mismatches += 1;
                    let origin = tx.origin;
                    let seq = *seq;
                    self.limiter.handle("bytes_seq", || {
                        warn!(origin = %origin, seq, expected, "Bytes sequence number out of order");
                    });
                }
                self.count(creator_index, PayloadType::Bytes);
            }
            TransactionBody::Dummy => self.count(creator_index, PayloadType::Dummy),
            TransactionBody::Lifecycle(op) => {
                actions.extend(self.apply_lifecycle(tx, op, signature, creator_index, ts));
            }
            TransactionBody::Tree(op) => match self.state.apply_tree(op) {
                Ok(payload_type) => self.count(creator_index, payload_type),
                Err(error) => {
                    self.stats.handle_failed += 1;
                    debug!(error = %error, "Tree operation rejected");
                }
            },
            TransactionBody::Activity {
                activity: ActivityKind::SaveExpectedMap,
            } => {
                if tx.origin.is_leader() {
                    self.count(creator_index, PayloadType::SaveExpectedMap);
                    actions.push(Action::ExportExpectedState {
                        node: self.config.node,
                        timestamp: ts,
                    });
                } else {
                    self.stats.ignored_activities += 1;
                    debug!(origin = %tx.origin, "Ignoring expected-map save from non-leader");
                }
            }
            TransactionBody::Control { control } => {
                if signature == SignatureStatus::Invalid {
                    self.stats.invalid_control_votes += 1;
                    let control = *control;
                    self.limiter.handle("control_signature", || {
                        warn!(creator = %creator, control = %control, "Control vote with invalid signature");
                    });
                } else {
                    self.count(creator_index, PayloadType::Control);
                    actions.extend(self.apply_control(*control, creator, creator_index, ts));
                }
            }
            TransactionBody::Freeze { start_after_secs } => {
                let start = ts.plus(Duration::from_secs(*start_after_secs));
                self.state.set_freeze_at(start);
                self.count(creator_index, PayloadType::Freeze);
                info!(node = %self.config.node, start = %start, "Freeze scheduled");
                actions.push(Action::ExportExpectedState {
                    node: self.config.node,
                    timestamp: ts,
                });
                actions.push(Action::FreezeScheduled { start });
            }
            TransactionBody::SimpleAction {
                action: SimpleAction::CauseDivergence,
            } => {
                self.count(creator_index, PayloadType::SimpleAction);
                if tx.origin == self.config.node {
                    self.cause_divergence();
                }
            }
        }

        self.state.set_last_timestamp(ts);
        self.stats.applied += 1;
        actions
    }

    fn count(&mut self, index: Option<usize>, payload_type: PayloadType) {
        if let Some(index) = index {
            self.state.counters_mut().record(index, payload_type);
        }
    }

    fn check_timestamp(&mut self, ts: ConsensusTimestamp) {
        let last = self.state.last_timestamp();
        if last != ConsensusTimestamp::ZERO
            && ts < last.plus_nanos(ConsensusTimestamp::MIN_SPACING_NANOS)
        {
            self.stats.timestamp_violations += 1;
            self.limiter.handle("timestamp", || {
                warn!(previous = %last, current = %ts, "Consensus timestamp did not advance enough");
            });
        }
    }

    fn apply_lifecycle(
        &mut self,
        tx: &Transaction,
        op: &LifecycleOp,
        signature: SignatureStatus,
        creator_index: Option<usize>,
        ts: ConsensusTimestamp,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        let signature_ok = match signature {
            SignatureStatus::Valid => true,
            SignatureStatus::Invalid => false,
            SignatureStatus::Unsigned => !tx.invalid_sig,
        };
        let expected_ok = !tx.invalid_sig;

        if signature_ok != expected_ok {
            for key in op.keys() {
                self.flag(key, DivergenceReason::InvalidSig, ts, &mut actions);
            }
        } else if !signature_ok {
            self.stats.expected_invalid += 1;
            return actions;
        }

        let expected_applied = if expected_ok {
            let (outcome, ambiguous) = self.expected.apply(op, ts);
            if let Some(divergence) = ambiguous {
                warn!(
                    key = %divergence.key,
                    "Entity re-created after delete; expected balance is ambiguous"
                );
                actions.push(Action::DivergenceDetected {
                    key: divergence.key,
                    reason: divergence.reason.to_string(),
                });
            }
            outcome.is_ok()
        } else {
            false
        };

        let actual_applied = if signature_ok {
            match self
                .state
                .apply_lifecycle(op, tx.origin, ts, self.config.record_ttl)
            {
                Ok(applied) => {
                    self.count(creator_index, applied.payload_type);
                    for key in &applied.touched {
                        self.schedule_expiry(key);
                    }
                    true
                }
                Err(error) => {
                    debug!(error = %error, op = op.name(), "Lifecycle operation rejected");
                    false
                }
            }
        } else {
            false
        };

        if actual_applied != expected_applied {
            for key in op.keys() {
                self.flag(key, DivergenceReason::HandleFailed, ts, &mut actions);
            }
        } else if !actual_applied {
            self.stats.handle_failed += 1;
        }

        for key in op.keys() {
            if let Some(reason) = self.expected.compare(&key, self.state.entity(&key)) {
                self.flag(key, reason, ts, &mut actions);
            }
        }
        actions
    }

    fn flag(
        &mut self,
        key: EntityKey,
        reason: DivergenceReason,
        ts: ConsensusTimestamp,
        actions: &mut Vec<Action>,
    ) {
        if self.expected.flag(key, reason, ts) {
            self.limiter.handle(reason.class(), || {
                warn!(key = %key, reason = %reason, "Entity diverged from expected state");
            });
            actions.push(Action::DivergenceDetected {
                key,
                reason: reason.to_string(),
            });
        }
    }

    fn apply_control(
        &mut self,
        control: ControlType,
        creator: NodeId,
        creator_index: Option<usize>,
        ts: ConsensusTimestamp,
    ) -> Vec<Action> {
        let Some(index) = creator_index else {
            debug!(creator = %creator, control = %control, "Control vote from node outside the roster");
            return Vec::new();
        };

        let outcome = self.quorum.record(index, ControlAction::new(ts, control));
        self.state.set_quorum(self.quorum.result());

        let mut actions = Vec::new();
        if let RecordOutcome::QuorumReached(_) = outcome {
            if control == ControlType::EnterValidation {
                actions.extend(self.verify_expected(ts));
                actions.push(Action::ExportExpectedState {
                    node: self.config.node,
                    timestamp: ts,
                });
            }
            actions.push(Action::QuorumReached {
                control,
                timestamp: ts,
            });
        }
        actions
    }

    /// Compare the whole expected map against the entity map.
    pub fn verify_expected(&mut self, ts: ConsensusTimestamp) -> Vec<Action> {
        let found = self.expected.verify_against(self.state.entities(), ts);
        for divergence in &found {
            self.limiter.handle(divergence.reason.class(), || {
                warn!(key = %divergence.key, reason = %divergence.reason, "Entity diverged from expected state");
            });
        }
        found
            .into_iter()
            .map(|d| Action::DivergenceDetected {
                key: d.key,
                reason: d.reason.to_string(),
            })
            .collect()
    }

    fn cause_divergence(&mut self) {
        let Some(key) = self.state.first_entity_key() else {
            debug!("No entity to corrupt");
            return;
        };
        if let Some(entity) = self.state.entity_mut(&key) {
            entity.balance = entity.balance.wrapping_add(1);
            warn!(node = %self.config.node, key = %key, "Deliberately corrupted entity");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Expiration
    // ═══════════════════════════════════════════════════════════════════════

    fn schedule_expiry(&self, key: &EntityKey) {
        if let Some(at) = self.state.entity(key).and_then(|e| e.earliest_expiry()) {
            self.expiration.schedule(*key, at);
        }
    }

    /// Purge everything that expired at or before `ts`. Returns the number
    /// of entities removed.
    pub fn purge_expired(&mut self, ts: ConsensusTimestamp) -> u64 {
        if self.expiration.is_empty() {
            return 0;
        }
        let started = Instant::now();
        let due = self.expiration.purge(ts);
        if due.is_empty() {
            return 0;
        }

        let mut entities = 0;
        let mut records = 0;
        for entry in due {
            let Some(entity) = self.state.entity_mut(&entry.key) else {
                continue;
            };
            if entity.lease_expired(ts) {
                let owner = entity.owner;
                let delete_type = match entity.kind {
                    EntityKind::Account => PayloadType::EntityDelete,
                    EntityKind::Queue => PayloadType::RecordDelete,
                };
                self.state.remove_entity(&entry.key);
                self.expected.expire(&entry.key, ts);
                let owner_index = self.roster.index_of(owner);
                self.count(owner_index, delete_type);
                entities += 1;
            } else {
                records += entity.purge_records(ts) as u64;
                if let Some(next) = entity.earliest_expiry() {
                    self.expiration.schedule(entry.key, next);
                }
            }
        }

        self.purge.record(entities, records, started.elapsed());
        debug!(entities, records, at = %ts, "Purged expired entries");
        entities
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reconnect
    // ═══════════════════════════════════════════════════════════════════════

    /// Adopt a snapshot received from a peer and rebuild from it.
    pub fn load_snapshot(&mut self, snapshot: StateSnapshot) {
        self.arena.publish(snapshot);
        self.rebuild_after_reconnect();
    }

    /// Rebuild the working state and every derived structure from the
    /// latest published snapshot.
    pub fn rebuild_after_reconnect(&mut self) {
        let latest = self.arena.latest();
        self.state = latest.to_mutable();
        self.state.counters_mut().ensure_len(self.roster.size());
        self.expected = ExpectedMap::from_entities(latest.entities(), latest.last_timestamp());
        self.expiration.rebuild(latest.expiration_entries());
        self.quorum.restore(latest.quorum().clone());
        info!(
            node = %self.config.node,
            version = latest.version(),
            entities = latest.entity_count(),
            pending_expiries = self.expiration.len(),
            "Rebuilt state after reconnect"
        );
    }
}

fn decode_and_verify(bytes: &[u8]) -> Result<(Transaction, SignatureStatus), CodecError> {
    let envelope = decode_envelope(bytes)?;
    let tx = envelope.decode_transaction()?;
    let status = envelope.signature_status(tx.origin);
    Ok((tx, status))
}

impl StateMachine for ReplicatedStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ConsensusRound(round) => self.on_round(round),
            Event::SystemTransactions { round, signatures } => {
                debug!(round = %round, count = signatures.len(), "System transactions");
                self.on_system_signatures(signatures);
                Vec::new()
            }
            Event::Reconnected => {
                self.rebuild_after_reconnect();
                Vec::new()
            }
            Event::StatusChanged(status) => {
                debug!(node = %self.config.node, status = ?status, "Platform status changed");
                Vec::new()
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}
