//! Time-ordered expiration queue.
//!
//! Entities with expiring records (or a lease) are scheduled under their
//! earliest expiry. Each entity has at most one pending entry; purging pops
//! every entry whose expiry is at or before the consensus time and clears it
//! from the pending set, so the caller can reschedule what is left.

use parking_lot::Mutex;
use replaygate_types::{ConsensusTimestamp, EntityKey};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// A scheduled expiry. Orders by time, then key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpirationEntry {
    pub expires_at: ConsensusTimestamp,
    pub key: EntityKey,
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Reverse<ExpirationEntry>>,
    pending: HashSet<EntityKey>,
}

/// Unbounded, thread-safe priority queue of expiries. Callers block on the
/// internal lock only.
#[derive(Debug, Default)]
pub struct ExpirationQueue {
    inner: Mutex<Inner>,
}

impl ExpirationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` to expire at `expires_at`.
    ///
    /// Returns false (and does nothing) when the key already has a pending
    /// entry.
    pub fn schedule(&self, key: EntityKey, expires_at: ConsensusTimestamp) -> bool {
        let mut inner = self.inner.lock();
        if !inner.pending.insert(key) {
            return false;
        }
        inner.heap.push(Reverse(ExpirationEntry { expires_at, key }));
        true
    }

    /// Remove and return every entry with `expires_at <= now`.
    ///
    /// A second call with the same `now` returns nothing.
    pub fn purge(&self, now: ConsensusTimestamp) -> Vec<ExpirationEntry> {
        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        while let Some(Reverse(head)) = inner.heap.peek().copied() {
            if head.expires_at > now {
                break;
            }
            inner.heap.pop();
            inner.pending.remove(&head.key);
            removed.push(head);
        }
        removed
    }

    /// Replace the contents, e.g. after rebuilding from a snapshot.
    ///
    /// Duplicate keys keep their earliest expiry.
    pub fn rebuild<I>(&self, entries: I)
    where
        I: IntoIterator<Item = ExpirationEntry>,
    {
        let mut sorted: Vec<ExpirationEntry> = entries.into_iter().collect();
        sorted.sort();

        let mut inner = self.inner.lock();
        inner.heap.clear();
        inner.pending.clear();
        for entry in sorted {
            if inner.pending.insert(entry.key) {
                inner.heap.push(Reverse(entry));
            }
        }
    }

    /// Whether `key` has a pending entry.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.inner.lock().pending.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(account: u64) -> EntityKey {
        EntityKey::new(0, 0, account)
    }

    #[test]
    fn test_purge_is_idempotent() {
        let queue = ExpirationQueue::new();
        queue.schedule(key(1), ConsensusTimestamp(10));
        queue.schedule(key(2), ConsensusTimestamp(20));
        queue.schedule(key(3), ConsensusTimestamp(30));

        let first = queue.purge(ConsensusTimestamp(20));
        assert_eq!(first.iter().map(|e| e.key).collect::<Vec<_>>(), vec![key(1), key(2)]);

        assert!(queue.purge(ConsensusTimestamp(20)).is_empty(), "second purge is a no-op");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_one_pending_entry_per_key() {
        let queue = ExpirationQueue::new();
        assert!(queue.schedule(key(1), ConsensusTimestamp(10)));
        assert!(!queue.schedule(key(1), ConsensusTimestamp(5)));
        assert_eq!(queue.len(), 1);

        queue.purge(ConsensusTimestamp(10));
        assert!(!queue.contains(&key(1)));
        assert!(queue.schedule(key(1), ConsensusTimestamp(40)), "purged key can be rescheduled");
    }

    #[test]
    fn test_purge_orders_by_expiry() {
        let queue = ExpirationQueue::new();
        queue.schedule(key(9), ConsensusTimestamp(3));
        queue.schedule(key(1), ConsensusTimestamp(7));
        queue.schedule(key(5), ConsensusTimestamp(1));

        let order: Vec<_> = queue
            .purge(ConsensusTimestamp(100))
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(order, vec![key(5), key(9), key(1)]);
    }

    #[test]
    fn test_rebuild_keeps_earliest_per_key() {
        let queue = ExpirationQueue::new();
        queue.schedule(key(7), ConsensusTimestamp(1));

        queue.rebuild([
            ExpirationEntry { expires_at: ConsensusTimestamp(50), key: key(1) },
            ExpirationEntry { expires_at: ConsensusTimestamp(20), key: key(1) },
            ExpirationEntry { expires_at: ConsensusTimestamp(30), key: key(2) },
        ]);

        assert!(!queue.contains(&key(7)));
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.purge(ConsensusTimestamp(25)),
            vec![ExpirationEntry { expires_at: ConsensusTimestamp(20), key: key(1) }]
        );
    }

    #[test]
    fn test_concurrent_schedule_and_purge() {
        let queue = Arc::new(ExpirationQueue::new());
        let producers: Vec<_> = (0..4u64)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100u64 {
                        queue.schedule(key(t * 1_000 + i), ConsensusTimestamp(i));
                    }
                })
            })
            .collect();

        let mut purged = 0;
        while purged < 400 {
            purged += queue.purge(ConsensusTimestamp(u64::MAX)).len();
            thread::yield_now();
        }
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(purged, 400, "every entry is purged exactly once");
        assert!(queue.is_empty());
    }
}
