//! Per-node transaction counters.

use replaygate_types::PayloadType;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Applied-transaction counts for one node, split by payload category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCounter {
    pub entity_create: u64,
    pub entity_update: u64,
    pub entity_transfer: u64,
    pub entity_delete: u64,
    pub record_create: u64,
    pub record_update: u64,
    pub record_transfer: u64,
    pub record_delete: u64,
    pub tree_create: u64,
    pub tree_update: u64,
    pub bytes: u64,
    pub dummy: u64,
    pub control: u64,
    pub activity: u64,
    pub freeze: u64,
}

impl TransactionCounter {
    /// Count one applied transaction of the given type.
    ///
    /// Assorted types are resolved to a concrete operation before they are
    /// counted and are ignored here.
    pub fn increment(&mut self, payload_type: PayloadType) {
        let slot = match payload_type {
            PayloadType::EntityCreate => &mut self.entity_create,
            PayloadType::EntityUpdate => &mut self.entity_update,
            PayloadType::EntityTransfer => &mut self.entity_transfer,
            PayloadType::EntityDelete => &mut self.entity_delete,
            PayloadType::RecordCreate => &mut self.record_create,
            PayloadType::RecordUpdate => &mut self.record_update,
            PayloadType::RecordTransfer => &mut self.record_transfer,
            PayloadType::RecordDelete => &mut self.record_delete,
            PayloadType::TreeCreate => &mut self.tree_create,
            PayloadType::TreeUpdate => &mut self.tree_update,
            PayloadType::Bytes => &mut self.bytes,
            PayloadType::Dummy => &mut self.dummy,
            PayloadType::Control => &mut self.control,
            PayloadType::SaveExpectedMap | PayloadType::SimpleAction => &mut self.activity,
            PayloadType::Freeze => &mut self.freeze,
            PayloadType::EntityAssorted | PayloadType::RecordAssorted => return,
        };
        *slot += 1;
    }

    /// Creates across entities and records.
    pub fn creates(&self) -> u64 {
        self.entity_create + self.record_create
    }

    /// Deletes across entities and records, purges included.
    pub fn deletes(&self) -> u64 {
        self.entity_delete + self.record_delete
    }

    /// Total counted transactions.
    pub fn total(&self) -> u64 {
        self.entity_create
            + self.entity_update
            + self.entity_transfer
            + self.entity_delete
            + self.record_create
            + self.record_update
            + self.record_transfer
            + self.record_delete
            + self.tree_create
            + self.tree_update
            + self.bytes
            + self.dummy
            + self.control
            + self.activity
            + self.freeze
    }
}

impl AddAssign for TransactionCounter {
    fn add_assign(&mut self, rhs: Self) {
        self.entity_create += rhs.entity_create;
        self.entity_update += rhs.entity_update;
        self.entity_transfer += rhs.entity_transfer;
        self.entity_delete += rhs.entity_delete;
        self.record_create += rhs.record_create;
        self.record_update += rhs.record_update;
        self.record_transfer += rhs.record_transfer;
        self.record_delete += rhs.record_delete;
        self.tree_create += rhs.tree_create;
        self.tree_update += rhs.tree_update;
        self.bytes += rhs.bytes;
        self.dummy += rhs.dummy;
        self.control += rhs.control;
        self.activity += rhs.activity;
        self.freeze += rhs.freeze;
    }
}

/// Counters for every roster position.
///
/// The vector grows when the roster grows and never shrinks, so counts for a
/// node that left the roster are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCounters {
    per_node: im::Vector<TransactionCounter>,
}

impl TransactionCounters {
    /// Counters for `len` nodes.
    pub fn new(len: usize) -> Self {
        let mut counters = Self::default();
        counters.ensure_len(len);
        counters
    }

    /// Grow to at least `len` entries. Never shrinks.
    pub fn ensure_len(&mut self, len: usize) {
        while self.per_node.len() < len {
            self.per_node.push_back(TransactionCounter::default());
        }
    }

    /// Count one transaction for the node at `index`, growing if needed.
    pub fn record(&mut self, index: usize, payload_type: PayloadType) {
        self.ensure_len(index + 1);
        if let Some(counter) = self.per_node.get_mut(index) {
            counter.increment(payload_type);
        }
    }

    /// Counter for the node at `index`.
    pub fn get(&self, index: usize) -> Option<&TransactionCounter> {
        self.per_node.get(index)
    }

    pub fn len(&self) -> usize {
        self.per_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_node.is_empty()
    }

    /// Sum over all nodes.
    pub fn total(&self) -> TransactionCounter {
        let mut total = TransactionCounter::default();
        for counter in self.per_node.iter() {
            total += *counter;
        }
        total
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionCounter> {
        self.per_node.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_by_type() {
        let mut counter = TransactionCounter::default();
        counter.increment(PayloadType::EntityCreate);
        counter.increment(PayloadType::RecordDelete);
        counter.increment(PayloadType::EntityAssorted);
        counter.increment(PayloadType::SimpleAction);

        assert_eq!(counter.creates(), 1);
        assert_eq!(counter.deletes(), 1);
        assert_eq!(counter.activity, 1);
        assert_eq!(counter.total(), 3, "assorted is not counted");
    }

    #[test]
    fn test_counters_never_shrink() {
        let mut counters = TransactionCounters::new(4);
        counters.record(3, PayloadType::Bytes);
        counters.ensure_len(2);

        assert_eq!(counters.len(), 4);
        assert_eq!(counters.get(3).map(|c| c.bytes), Some(1));
    }

    #[test]
    fn test_record_grows_for_new_index() {
        let mut counters = TransactionCounters::new(1);
        counters.record(5, PayloadType::Control);

        assert_eq!(counters.len(), 6);
        assert_eq!(counters.total().control, 1);
    }
}
