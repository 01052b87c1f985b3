//! Copy-on-write replicated state.
//!
//! State exists in two forms. A [`MutableState`] has a single owner and is
//! the only thing the apply path writes to. Publishing it freezes the
//! contents into an immutable [`StateSnapshot`] and moves the mutable state
//! on to the next version. Both share every unchanged subtree through `im`'s
//! persistent maps, so a publish costs O(1) and a mutation copies only the
//! path it touches.

use crate::counters::TransactionCounters;
use crate::entity::{entity_leaf, EntityValue};
use crate::expiration::ExpirationEntry;
use replaygate_quorum::QuorumResult;
use replaygate_types::{
    state_digest_message, ConsensusTimestamp, EntityKey, EntityKind, Hash, LifecycleOp, NodeId,
    PayloadType, TreeOp,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("snapshot deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Why the entity map rejected an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("entity {0} already exists")]
    AlreadyExists(EntityKey),

    #[error("entity {0} not found")]
    NotFound(EntityKey),

    #[error("entity {key} has balance {balance}, needs {amount}")]
    InsufficientBalance {
        key: EntityKey,
        balance: u64,
        amount: u64,
    },
}

/// Result of a successful lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Concrete type for counting, resolved from the entity kind.
    pub payload_type: PayloadType,
    /// Entities whose expiry may have changed.
    pub touched: Vec<EntityKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StateData {
    version: u64,
    entities: im::OrdMap<EntityKey, EntityValue>,
    tree: im::OrdMap<EntityKey, Vec<u8>>,
    counters: TransactionCounters,
    quorum: QuorumResult,
    /// Next expected bytes sequence number per origin.
    next_seq: im::OrdMap<NodeId, u64>,
    last_timestamp: ConsensusTimestamp,
    #[serde(default)]
    freeze_at: Option<ConsensusTimestamp>,
}

/// The single writable version of the state.
///
/// Not `Clone`: there is at most one per node.
#[derive(Debug, PartialEq, Eq)]
pub struct MutableState {
    data: StateData,
}

impl MutableState {
    /// Empty genesis state for a roster.
    pub fn genesis(roster_size: usize, total_weight: u64) -> Self {
        Self {
            data: StateData {
                version: 0,
                entities: im::OrdMap::new(),
                tree: im::OrdMap::new(),
                counters: TransactionCounters::new(roster_size),
                quorum: QuorumResult::new(roster_size, total_weight),
                next_seq: im::OrdMap::new(),
                last_timestamp: ConsensusTimestamp::ZERO,
                freeze_at: None,
            },
        }
    }

    /// Freeze the current contents into a snapshot and move this state on
    /// to the next version.
    pub fn publish(&mut self) -> StateSnapshot {
        let snapshot = StateSnapshot {
            data: self.data.clone(),
        };
        self.data.version += 1;
        snapshot
    }

    pub fn version(&self) -> u64 {
        self.data.version
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&EntityValue> {
        self.data.entities.get(key)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityKey, &EntityValue)> {
        self.data.entities.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.data.entities.len()
    }

    pub fn tree_leaf(&self, key: &EntityKey) -> Option<&[u8]> {
        self.data.tree.get(key).map(Vec::as_slice)
    }

    pub fn counters(&self) -> &TransactionCounters {
        &self.data.counters
    }

    pub fn counters_mut(&mut self) -> &mut TransactionCounters {
        &mut self.data.counters
    }

    pub fn set_quorum(&mut self, quorum: QuorumResult) {
        self.data.quorum = quorum;
    }

    pub fn last_timestamp(&self) -> ConsensusTimestamp {
        self.data.last_timestamp
    }

    pub fn set_last_timestamp(&mut self, ts: ConsensusTimestamp) {
        self.data.last_timestamp = ts;
    }

    pub fn freeze_at(&self) -> Option<ConsensusTimestamp> {
        self.data.freeze_at
    }

    pub fn set_freeze_at(&mut self, at: ConsensusTimestamp) {
        self.data.freeze_at = Some(at);
    }

    /// Check a bytes sequence number and advance the origin's counter.
    ///
    /// Returns the expected value when `seq` is not it.
    pub fn check_seq(&mut self, origin: NodeId, seq: u64) -> Result<(), u64> {
        let expected = self.data.next_seq.get(&origin).copied().unwrap_or(0);
        self.data.next_seq.insert(origin, seq.saturating_add(1));
        if seq == expected {
            Ok(())
        } else {
            Err(expected)
        }
    }

    /// Apply a lifecycle operation to the entity map.
    ///
    /// `record_ttl` is how long records appended by updates and transfers
    /// stay before the expiration queue purges them.
    pub fn apply_lifecycle(
        &mut self,
        op: &LifecycleOp,
        origin: NodeId,
        at: ConsensusTimestamp,
        record_ttl: Duration,
    ) -> Result<Applied, ApplyError> {
        let entities = &mut self.data.entities;
        let record_expiry = at.plus(record_ttl);

        match *op {
            LifecycleOp::Create {
                key,
                kind,
                balance,
                lease_secs,
            } => {
                if entities.contains_key(&key) {
                    return Err(ApplyError::AlreadyExists(key));
                }
                let lease = lease_secs.map(|secs| at.plus(Duration::from_secs(secs)));
                entities.insert(key, EntityValue::new(kind, balance, origin).with_lease(lease));
                Ok(Applied {
                    payload_type: resolve(kind, PayloadType::EntityCreate),
                    touched: vec![key],
                })
            }
            LifecycleOp::Update { key, balance } => {
                let entity = entities.get_mut(&key).ok_or(ApplyError::NotFound(key))?;
                entity.balance = balance;
                entity.push_record(balance, record_expiry);
                Ok(Applied {
                    payload_type: resolve(entity.kind, PayloadType::EntityUpdate),
                    touched: vec![key],
                })
            }
            LifecycleOp::Transfer { from, to, amount } => {
                let source = entities.get(&from).ok_or(ApplyError::NotFound(from))?;
                if !entities.contains_key(&to) {
                    return Err(ApplyError::NotFound(to));
                }
                if source.balance < amount {
                    return Err(ApplyError::InsufficientBalance {
                        key: from,
                        balance: source.balance,
                        amount,
                    });
                }
                let kind = source.kind;

                if let Some(source) = entities.get_mut(&from) {
                    source.balance -= amount;
                    source.push_record(amount, record_expiry);
                }
                if let Some(dest) = entities.get_mut(&to) {
                    dest.balance = dest.balance.saturating_add(amount);
                    dest.push_record(amount, record_expiry);
                }
                Ok(Applied {
                    payload_type: resolve(kind, PayloadType::EntityTransfer),
                    touched: vec![from, to],
                })
            }
            LifecycleOp::Delete { key } => {
                let removed = entities.remove(&key).ok_or(ApplyError::NotFound(key))?;
                Ok(Applied {
                    payload_type: resolve(removed.kind, PayloadType::EntityDelete),
                    touched: Vec::new(),
                })
            }
        }
    }

    /// Apply a tree operation. Creates fail on existing leaves and updates on
    /// missing ones.
    pub fn apply_tree(&mut self, op: &TreeOp) -> Result<PayloadType, ApplyError> {
        match op {
            TreeOp::Create { key, value } => {
                if self.data.tree.contains_key(key) {
                    return Err(ApplyError::AlreadyExists(*key));
                }
                self.data.tree.insert(*key, value.clone());
                Ok(PayloadType::TreeCreate)
            }
            TreeOp::Update { key, value } => {
                let leaf = self.data.tree.get_mut(key).ok_or(ApplyError::NotFound(*key))?;
                *leaf = value.clone();
                Ok(PayloadType::TreeUpdate)
            }
        }
    }

    /// Remove an entity whose lease ran out.
    pub fn remove_entity(&mut self, key: &EntityKey) -> Option<EntityValue> {
        self.data.entities.remove(key)
    }

    /// Mutable access for expiry processing and fault injection.
    pub fn entity_mut(&mut self, key: &EntityKey) -> Option<&mut EntityValue> {
        self.data.entities.get_mut(key)
    }

    /// Smallest key in the entity map.
    pub fn first_entity_key(&self) -> Option<EntityKey> {
        self.data.entities.get_min().map(|(key, _)| *key)
    }
}

fn resolve(kind: EntityKind, entity_type: PayloadType) -> PayloadType {
    match (kind, entity_type) {
        (EntityKind::Account, t) => t,
        (EntityKind::Queue, PayloadType::EntityCreate) => PayloadType::RecordCreate,
        (EntityKind::Queue, PayloadType::EntityUpdate) => PayloadType::RecordUpdate,
        (EntityKind::Queue, PayloadType::EntityTransfer) => PayloadType::RecordTransfer,
        (EntityKind::Queue, PayloadType::EntityDelete) => PayloadType::RecordDelete,
        (EntityKind::Queue, t) => t,
    }
}

/// An immutable, published version of the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    data: StateData,
}

impl StateSnapshot {
    pub fn version(&self) -> u64 {
        self.data.version
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&EntityValue> {
        self.data.entities.get(key)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityKey, &EntityValue)> {
        self.data.entities.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.data.entities.len()
    }

    pub fn tree_leaf(&self, key: &EntityKey) -> Option<&[u8]> {
        self.data.tree.get(key).map(Vec::as_slice)
    }

    pub fn counters(&self) -> &TransactionCounters {
        &self.data.counters
    }

    pub fn quorum(&self) -> &QuorumResult {
        &self.data.quorum
    }

    pub fn last_timestamp(&self) -> ConsensusTimestamp {
        self.data.last_timestamp
    }

    pub fn freeze_at(&self) -> Option<ConsensusTimestamp> {
        self.data.freeze_at
    }

    /// Earliest expiry of every entity that has one.
    pub fn expiration_entries(&self) -> impl Iterator<Item = ExpirationEntry> + '_ {
        self.data.entities.iter().filter_map(|(key, value)| {
            value.earliest_expiry().map(|expires_at| ExpirationEntry {
                expires_at,
                key: *key,
            })
        })
    }

    /// Digest over the entity map in key order.
    pub fn entities_digest(&self) -> Hash {
        let mut leaves = Vec::with_capacity(self.data.entities.len() * 33);
        for (key, value) in self.data.entities.iter() {
            leaves.extend_from_slice(&entity_leaf(key, value.kind, value.balance));
        }
        Hash::from_bytes(&leaves)
    }

    /// Digest identifying this snapshot on `node`.
    pub fn digest(&self, node: NodeId) -> Hash {
        Hash::from_bytes(&state_digest_message(
            node,
            self.data.version,
            &self.entities_digest(),
        ))
    }

    /// Start a new writable version from this snapshot.
    pub fn to_mutable(&self) -> MutableState {
        let mut data = self.data.clone();
        data.version += 1;
        MutableState { data }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(&self.data).map_err(SnapshotError::Serialize)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let data = serde_json::from_slice(bytes).map_err(SnapshotError::Deserialize)?;
        Ok(Self { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn key(account: u64) -> EntityKey {
        EntityKey::new(0, 0, account)
    }

    fn create(account: u64, kind: EntityKind, balance: u64) -> LifecycleOp {
        LifecycleOp::Create {
            key: key(account),
            kind,
            balance,
            lease_secs: None,
        }
    }

    fn ts(secs: u64) -> ConsensusTimestamp {
        ConsensusTimestamp::from_secs(secs)
    }

    #[test]
    fn test_publish_freezes_and_advances_version() {
        let mut state = MutableState::genesis(3, 3);
        state
            .apply_lifecycle(&create(1, EntityKind::Account, 10), NodeId(0), ts(1), TTL)
            .unwrap();

        let snapshot = state.publish();
        assert_eq!(snapshot.version(), 0);
        assert_eq!(state.version(), 1);

        state
            .apply_lifecycle(&LifecycleOp::Update { key: key(1), balance: 3 }, NodeId(0), ts(2), TTL)
            .unwrap();
        assert_eq!(snapshot.entity(&key(1)).map(|e| e.balance), Some(10), "snapshot is immutable");
        assert_eq!(state.entity(&key(1)).map(|e| e.balance), Some(3));
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut state = MutableState::genesis(1, 1);
        let origin = NodeId(0);
        state.apply_lifecycle(&create(1, EntityKind::Account, 5), origin, ts(1), TTL).unwrap();
        state.apply_lifecycle(&create(2, EntityKind::Account, 0), origin, ts(1), TTL).unwrap();

        assert_eq!(
            state.apply_lifecycle(&create(1, EntityKind::Account, 5), origin, ts(2), TTL),
            Err(ApplyError::AlreadyExists(key(1)))
        );
        assert_eq!(
            state.apply_lifecycle(&LifecycleOp::Delete { key: key(9) }, origin, ts(2), TTL),
            Err(ApplyError::NotFound(key(9)))
        );
        let overdraw = LifecycleOp::Transfer { from: key(1), to: key(2), amount: 6 };
        assert!(matches!(
            state.apply_lifecycle(&overdraw, origin, ts(2), TTL),
            Err(ApplyError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_queue_entities_resolve_to_record_types() {
        let mut state = MutableState::genesis(1, 1);
        let origin = NodeId(0);
        let applied = state
            .apply_lifecycle(&create(1, EntityKind::Queue, 5), origin, ts(1), TTL)
            .unwrap();
        assert_eq!(applied.payload_type, PayloadType::RecordCreate);

        let applied = state
            .apply_lifecycle(&LifecycleOp::Update { key: key(1), balance: 7 }, origin, ts(2), TTL)
            .unwrap();
        assert_eq!(applied.payload_type, PayloadType::RecordUpdate);
        assert_eq!(
            state.entity(&key(1)).and_then(|e| e.earliest_expiry()),
            Some(ts(2).plus(TTL))
        );
    }

    #[test]
    fn test_bytes_sequence_check() {
        let mut state = MutableState::genesis(2, 2);
        assert_eq!(state.check_seq(NodeId(1), 0), Ok(()));
        assert_eq!(state.check_seq(NodeId(1), 1), Ok(()));
        assert_eq!(state.check_seq(NodeId(1), 5), Err(2));
        assert_eq!(state.check_seq(NodeId(1), 6), Ok(()), "counter follows the last seen value");
    }

    #[test]
    fn test_tree_create_then_update() {
        let mut state = MutableState::genesis(1, 1);
        let leaf = key(4);
        assert_eq!(
            state.apply_tree(&TreeOp::Update { key: leaf, value: vec![1] }),
            Err(ApplyError::NotFound(leaf))
        );
        assert_eq!(
            state.apply_tree(&TreeOp::Create { key: leaf, value: vec![1] }),
            Ok(PayloadType::TreeCreate)
        );
        state.apply_tree(&TreeOp::Update { key: leaf, value: vec![2] }).unwrap();
        assert_eq!(state.tree_leaf(&leaf), Some(&[2u8][..]));
    }

    #[test]
    fn test_snapshot_round_trip_preserves_entities_and_counters() {
        let mut state = MutableState::genesis(4, 4);
        let origin = NodeId(2);
        state.apply_lifecycle(&create(1, EntityKind::Queue, 10), origin, ts(1), TTL).unwrap();
        state.apply_lifecycle(&create(2, EntityKind::Account, 3), origin, ts(1), TTL).unwrap();
        state
            .apply_lifecycle(
                &LifecycleOp::Transfer { from: key(1), to: key(2), amount: 4 },
                origin,
                ts(2),
                TTL,
            )
            .unwrap();
        state.counters_mut().record(2, PayloadType::RecordCreate);
        state.counters_mut().record(2, PayloadType::EntityTransfer);
        state.set_quorum(QuorumResult::new(4, 4));

        let snapshot = state.publish();
        let bytes = snapshot.to_bytes().unwrap();
        let restored = StateSnapshot::from_bytes(&bytes).unwrap();

        assert_eq!(restored, snapshot);
        assert_eq!(restored.entities_digest(), snapshot.entities_digest());
        assert_eq!(restored.counters().get(2), snapshot.counters().get(2));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            StateSnapshot::from_bytes(b"not json"),
            Err(SnapshotError::Deserialize(_))
        ));
    }
}
