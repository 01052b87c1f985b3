//! Values stored in the entity map.

use replaygate_types::{ConsensusTimestamp, EntityKey, EntityKind, NodeId};
use serde::{Deserialize, Serialize};

/// One expiring transaction record held by a queue entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub amount: u64,
    pub expires_at: ConsensusTimestamp,
}

/// An entity in the replicated state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityValue {
    pub kind: EntityKind,
    pub balance: u64,
    /// Node that created the entity. Purges are counted against it.
    pub owner: NodeId,
    /// Expiring records, oldest first. Only queue entities carry records.
    #[serde(default)]
    pub records: im::Vector<Record>,
    /// The entity itself is purged at this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<ConsensusTimestamp>,
}

impl EntityValue {
    /// Create an entity with no records.
    pub fn new(kind: EntityKind, balance: u64, owner: NodeId) -> Self {
        Self {
            kind,
            balance,
            owner,
            records: im::Vector::new(),
            lease_expires_at: None,
        }
    }

    /// Set a lease expiry.
    pub fn with_lease(mut self, expires_at: Option<ConsensusTimestamp>) -> Self {
        self.lease_expires_at = expires_at;
        self
    }

    /// Append a record if this entity keeps them.
    pub fn push_record(&mut self, amount: u64, expires_at: ConsensusTimestamp) {
        if self.kind == EntityKind::Queue {
            self.records.push_back(Record { amount, expires_at });
        }
    }

    /// Earliest time anything about this entity expires.
    pub fn earliest_expiry(&self) -> Option<ConsensusTimestamp> {
        let record = self.records.iter().map(|r| r.expires_at).min();
        match (record, self.lease_expires_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether the lease has run out at `now`.
    pub fn lease_expired(&self, now: ConsensusTimestamp) -> bool {
        self.lease_expires_at.is_some_and(|at| at <= now)
    }

    /// Drop records that expired at or before `now`. Returns how many.
    pub fn purge_records(&mut self, now: ConsensusTimestamp) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.expires_at > now);
        before - self.records.len()
    }
}

/// Canonical bytes of a live entity, shared by the real and shadow digests.
pub fn entity_leaf(key: &EntityKey, kind: EntityKind, balance: u64) -> [u8; 33] {
    let mut leaf = [0u8; 33];
    leaf[..24].copy_from_slice(&key.to_bytes());
    leaf[24] = match kind {
        EntityKind::Account => 0,
        EntityKind::Queue => 1,
    };
    leaf[25..33].copy_from_slice(&balance.to_le_bytes());
    leaf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_queues_keep_records() {
        let mut account = EntityValue::new(EntityKind::Account, 5, NodeId(0));
        account.push_record(5, ConsensusTimestamp(10));
        assert!(account.records.is_empty());

        let mut queue = EntityValue::new(EntityKind::Queue, 5, NodeId(0));
        queue.push_record(5, ConsensusTimestamp(10));
        assert_eq!(queue.records.len(), 1);
    }

    #[test]
    fn test_earliest_expiry_considers_lease() {
        let mut queue = EntityValue::new(EntityKind::Queue, 1, NodeId(1))
            .with_lease(Some(ConsensusTimestamp(50)));
        assert_eq!(queue.earliest_expiry(), Some(ConsensusTimestamp(50)));

        queue.push_record(1, ConsensusTimestamp(30));
        queue.push_record(1, ConsensusTimestamp(70));
        assert_eq!(queue.earliest_expiry(), Some(ConsensusTimestamp(30)));
        assert!(!queue.lease_expired(ConsensusTimestamp(49)));
        assert!(queue.lease_expired(ConsensusTimestamp(50)));
    }

    #[test]
    fn test_purge_records_at_boundary() {
        let mut queue = EntityValue::new(EntityKind::Queue, 1, NodeId(1));
        queue.push_record(1, ConsensusTimestamp(30));
        queue.push_record(2, ConsensusTimestamp(31));

        assert_eq!(queue.purge_records(ConsensusTimestamp(30)), 1, "expiry == now purges");
        assert_eq!(queue.purge_records(ConsensusTimestamp(30)), 0);
        assert_eq!(queue.earliest_expiry(), Some(ConsensusTimestamp(31)));
    }
}
