//! Shadow model of the entity map.
//!
//! The expected map tracks what every lifecycle operation *should* have done,
//! independently of the entity map the state machine actually mutates. After
//! each operation the two are compared; any disagreement is flagged on the
//! entity and reported at the end of the test. Divergence is never fatal.
//!
//! One case cannot be decided: an entity deleted and then created again
//! under the same key. Its expected balance may be the new create's balance
//! or carry over from the first life, so the entry is flagged
//! [`DivergenceReason::AmbiguousRecreatedBalance`] and its value is no
//! longer compared.

use crate::entity::{entity_leaf, EntityValue};
use indexmap::IndexMap;
use replaygate_types::{ConsensusTimestamp, EntityKey, EntityKind, Hash, LifecycleOp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an entity was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceReason {
    /// Signature validity did not match what the submitter intended.
    InvalidSig,
    /// The operation succeeded on one side and failed on the other.
    HandleFailed,
    /// Existence or balance differs.
    ValueMismatch {
        expected: Option<u64>,
        actual: Option<u64>,
    },
    /// Re-created after delete; expected balance is undecidable.
    AmbiguousRecreatedBalance,
}

impl DivergenceReason {
    /// Stable class name for reporting.
    pub fn class(&self) -> &'static str {
        match self {
            DivergenceReason::InvalidSig => "INVALID_SIG",
            DivergenceReason::HandleFailed => "HANDLE_FAILED",
            DivergenceReason::ValueMismatch { .. } => "VALUE_MISMATCH",
            DivergenceReason::AmbiguousRecreatedBalance => "AMBIGUOUS_RECREATE",
        }
    }
}

impl fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceReason::ValueMismatch { expected, actual } => {
                write!(f, "VALUE_MISMATCH (expected {:?}, actual {:?})", expected, actual)
            }
            other => f.write_str(other.class()),
        }
    }
}

/// A flagged entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divergence {
    pub key: EntityKey,
    pub reason: DivergenceReason,
}

/// Lifecycle of an expected entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedStatus {
    Live,
    Deleted,
    /// Only known because something was flagged on it.
    Unknown,
}

/// Expected state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedValue {
    pub kind: EntityKind,
    pub balance: u64,
    pub status: ExpectedStatus,
    /// First divergence flagged on this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<DivergenceReason>,
    pub updated_at: ConsensusTimestamp,
}

impl ExpectedValue {
    /// A live entry.
    pub fn live(kind: EntityKind, balance: u64, updated_at: ConsensusTimestamp) -> Self {
        Self {
            kind,
            balance,
            status: ExpectedStatus::Live,
            divergence: None,
            updated_at,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == ExpectedStatus::Live
    }

    fn expected_balance(&self) -> Option<u64> {
        self.is_live().then_some(self.balance)
    }
}

/// Why the shadow model expects an operation to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedFailure {
    AlreadyExists,
    NotFound,
    InsufficientBalance,
}

/// Divergence counts by class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceSummary {
    pub invalid_sig: u64,
    pub handle_failed: u64,
    pub value_mismatch: u64,
    pub ambiguous_recreate: u64,
}

impl DivergenceSummary {
    pub fn total(&self) -> u64 {
        self.invalid_sig + self.handle_failed + self.value_mismatch + self.ambiguous_recreate
    }
}

/// The shadow map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedMap {
    entries: IndexMap<EntityKey, ExpectedValue>,
}

impl ExpectedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the shadow from an entity map, e.g. after a reconnect.
    pub fn from_entities<'a, I>(entities: I, at: ConsensusTimestamp) -> Self
    where
        I: IntoIterator<Item = (&'a EntityKey, &'a EntityValue)>,
    {
        let entries = entities
            .into_iter()
            .map(|(key, value)| (*key, ExpectedValue::live(value.kind, value.balance, at)))
            .collect();
        Self { entries }
    }

    /// Set the expected value of an entity directly.
    pub fn expect(&mut self, key: EntityKey, value: ExpectedValue) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &EntityKey) -> Option<&ExpectedValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &ExpectedValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply the intended effect of a lifecycle operation.
    ///
    /// Returns the expected outcome plus any divergence the shadow can
    /// detect on its own (the ambiguous re-create).
    pub fn apply(
        &mut self,
        op: &LifecycleOp,
        at: ConsensusTimestamp,
    ) -> (Result<(), ExpectedFailure>, Option<Divergence>) {
        match *op {
            LifecycleOp::Create {
                key, kind, balance, ..
            } => match self.entries.get(&key).map(|e| e.status) {
                Some(ExpectedStatus::Live) => (Err(ExpectedFailure::AlreadyExists), None),
                Some(ExpectedStatus::Deleted) => {
                    let reason = DivergenceReason::AmbiguousRecreatedBalance;
                    if let Some(entry) = self.entries.get_mut(&key) {
                        entry.kind = kind;
                        entry.balance = balance;
                        entry.status = ExpectedStatus::Live;
                        entry.updated_at = at;
                        entry.divergence.get_or_insert(reason);
                    }
                    (Ok(()), Some(Divergence { key, reason }))
                }
                Some(ExpectedStatus::Unknown) | None => {
                    let divergence = self.entries.get(&key).and_then(|e| e.divergence);
                    let mut value = ExpectedValue::live(kind, balance, at);
                    value.divergence = divergence;
                    self.entries.insert(key, value);
                    (Ok(()), None)
                }
            },
            LifecycleOp::Update { key, balance } => match self.live_mut(&key) {
                Some(entry) => {
                    entry.balance = balance;
                    entry.updated_at = at;
                    (Ok(()), None)
                }
                None => (Err(ExpectedFailure::NotFound), None),
            },
            LifecycleOp::Transfer { from, to, amount } => {
                let (Some(source), Some(_)) = (self.live(&from), self.live(&to)) else {
                    return (Err(ExpectedFailure::NotFound), None);
                };
                if source.balance < amount {
                    return (Err(ExpectedFailure::InsufficientBalance), None);
                }
                if let Some(source) = self.live_mut(&from) {
                    source.balance -= amount;
                    source.updated_at = at;
                }
                if let Some(dest) = self.live_mut(&to) {
                    dest.balance = dest.balance.saturating_add(amount);
                    dest.updated_at = at;
                }
                (Ok(()), None)
            }
            LifecycleOp::Delete { key } => match self.live_mut(&key) {
                Some(entry) => {
                    entry.status = ExpectedStatus::Deleted;
                    entry.updated_at = at;
                    (Ok(()), None)
                }
                None => (Err(ExpectedFailure::NotFound), None),
            },
        }
    }

    /// Mark an entity deleted because its lease ran out.
    pub fn expire(&mut self, key: &EntityKey, at: ConsensusTimestamp) {
        if let Some(entry) = self.live_mut(key) {
            entry.status = ExpectedStatus::Deleted;
            entry.updated_at = at;
        }
    }

    fn live(&self, key: &EntityKey) -> Option<&ExpectedValue> {
        self.entries.get(key).filter(|e| e.is_live())
    }

    fn live_mut(&mut self, key: &EntityKey) -> Option<&mut ExpectedValue> {
        self.entries.get_mut(key).filter(|e| e.is_live())
    }

    /// Compare one entity against its actual value.
    ///
    /// Entries flagged ambiguous are not value-compared.
    pub fn compare(&self, key: &EntityKey, actual: Option<&EntityValue>) -> Option<DivergenceReason> {
        let entry = self.entries.get(key);
        if entry.and_then(|e| e.divergence) == Some(DivergenceReason::AmbiguousRecreatedBalance) {
            return None;
        }

        let expected = entry.and_then(|e| e.expected_balance());
        let actual_balance = actual.map(|v| v.balance);
        let kind_differs = match (entry, actual) {
            (Some(e), Some(a)) if e.is_live() => e.kind != a.kind,
            _ => false,
        };
        if expected != actual_balance || kind_differs {
            Some(DivergenceReason::ValueMismatch {
                expected,
                actual: actual_balance,
            })
        } else {
            None
        }
    }

    /// Flag a divergence on an entity. The first reason per entity sticks.
    ///
    /// Returns true when this is a new flag.
    pub fn flag(&mut self, key: EntityKey, reason: DivergenceReason, at: ConsensusTimestamp) -> bool {
        let entry = self.entries.entry(key).or_insert_with(|| ExpectedValue {
            kind: EntityKind::Account,
            balance: 0,
            status: ExpectedStatus::Unknown,
            divergence: None,
            updated_at: at,
        });
        if entry.divergence.is_some() {
            return false;
        }
        entry.divergence = Some(reason);
        true
    }

    /// Compare the whole shadow against an entity map and flag every
    /// mismatch not already flagged.
    pub fn verify_against<'a, I>(
        &mut self,
        entities: I,
        at: ConsensusTimestamp,
    ) -> Vec<Divergence>
    where
        I: IntoIterator<Item = (&'a EntityKey, &'a EntityValue)>,
    {
        let actual: IndexMap<EntityKey, &EntityValue> =
            entities.into_iter().map(|(k, v)| (*k, v)).collect();

        let mut keys: Vec<EntityKey> = self.entries.keys().copied().collect();
        keys.extend(actual.keys().filter(|k| !self.entries.contains_key(*k)));

        let mut found = Vec::new();
        for key in keys {
            if let Some(reason) = self.compare(&key, actual.get(&key).copied()) {
                if self.flag(key, reason, at) {
                    found.push(Divergence { key, reason });
                }
            }
        }
        found
    }

    /// All flagged entities.
    pub fn flagged(&self) -> impl Iterator<Item = Divergence> + '_ {
        self.entries.iter().filter_map(|(key, value)| {
            value.divergence.map(|reason| Divergence { key: *key, reason })
        })
    }

    /// Divergence counts by class.
    pub fn divergences(&self) -> DivergenceSummary {
        let mut summary = DivergenceSummary::default();
        for divergence in self.flagged() {
            match divergence.reason {
                DivergenceReason::InvalidSig => summary.invalid_sig += 1,
                DivergenceReason::HandleFailed => summary.handle_failed += 1,
                DivergenceReason::ValueMismatch { .. } => summary.value_mismatch += 1,
                DivergenceReason::AmbiguousRecreatedBalance => summary.ambiguous_recreate += 1,
            }
        }
        summary
    }

    /// Digest over live entries in key order.
    ///
    /// Equals [`crate::StateSnapshot::entities_digest`] when the entity map
    /// matches the shadow.
    pub fn digest(&self) -> Hash {
        let mut live: Vec<_> = self.entries.iter().filter(|(_, v)| v.is_live()).collect();
        live.sort_by_key(|(key, _)| **key);

        let mut leaves = Vec::with_capacity(live.len() * 33);
        for (key, value) in live {
            leaves.extend_from_slice(&entity_leaf(key, value.kind, value.balance));
        }
        Hash::from_bytes(&leaves)
    }
}
