//! Latest-snapshot pointer shared between the apply path and readers.

use crate::snapshot::StateSnapshot;
use arc_swap::ArcSwap;
use std::ops::Deref;
use std::sync::Arc;

/// A published snapshot together with the epoch it was published at.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    epoch: u64,
    snapshot: Arc<StateSnapshot>,
}

impl SnapshotHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> &Arc<StateSnapshot> {
        &self.snapshot
    }
}

impl Deref for SnapshotHandle {
    type Target = StateSnapshot;

    fn deref(&self) -> &StateSnapshot {
        &self.snapshot
    }
}

/// Holds the most recently published snapshot.
///
/// Readers load the current handle without blocking and keep it alive as
/// long as they like; old snapshots are dropped when the last handle goes.
/// Every publish bumps the epoch so a reader can tell its handle is stale.
#[derive(Debug)]
pub struct SnapshotArena {
    latest: ArcSwap<SnapshotHandle>,
}

impl SnapshotArena {
    /// Create an arena whose first epoch holds `genesis`.
    pub fn new(genesis: StateSnapshot) -> Self {
        Self {
            latest: ArcSwap::from_pointee(SnapshotHandle {
                epoch: 0,
                snapshot: Arc::new(genesis),
            }),
        }
    }

    /// Make `snapshot` the latest. Only the apply path publishes.
    pub fn publish(&self, snapshot: StateSnapshot) -> SnapshotHandle {
        let epoch = self.latest.load().epoch + 1;
        let handle = SnapshotHandle {
            epoch,
            snapshot: Arc::new(snapshot),
        };
        self.latest.store(Arc::new(handle.clone()));
        handle
    }

    /// The latest published snapshot. Wait-free.
    pub fn latest(&self) -> SnapshotHandle {
        SnapshotHandle::clone(&self.latest.load())
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.latest.load().epoch
    }

    /// Whether a newer snapshot has been published since `handle`.
    pub fn is_stale(&self, handle: &SnapshotHandle) -> bool {
        handle.epoch < self.epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MutableState;
    use replaygate_types::{ConsensusTimestamp, EntityKey, EntityKind, LifecycleOp, NodeId};
    use std::time::Duration;

    fn genesis() -> (StateSnapshot, MutableState) {
        let mut state = MutableState::genesis(2, 2);
        (state.publish(), state)
    }

    #[test]
    fn test_stale_handles_are_detected() {
        let (snapshot, mut state) = genesis();
        let arena = SnapshotArena::new(snapshot);
        let first = arena.latest();
        assert!(!arena.is_stale(&first));

        state
            .apply_lifecycle(
                &LifecycleOp::Create {
                    key: EntityKey::new(0, 0, 1),
                    kind: EntityKind::Account,
                    balance: 1,
                    lease_secs: None,
                },
                NodeId(0),
                ConsensusTimestamp(1_000),
                Duration::from_secs(1),
            )
            .unwrap();
        let second = arena.publish(state.publish());

        assert!(arena.is_stale(&first));
        assert!(!arena.is_stale(&second));
        assert_eq!(second.epoch(), 1);
        assert_eq!(first.entity_count(), 0, "old handle still reads its own version");
        assert_eq!(arena.latest().entity_count(), 1);
    }
}
