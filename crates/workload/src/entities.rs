//! The generator's view of the entities it created.
//!
//! Keys live in the submitting node's realm so two submitters never
//! collide. The pool is updated optimistically when a payload is built;
//! ordering is per-submitter FIFO, so a later payload never reaches
//! consensus before the create it depends on.

use rand::Rng;
use replaygate_types::{EntityKey, EntityKind, NodeId};
use serde::{Deserialize, Serialize};

/// Starting balance offset for new entities.
pub const INIT_BALANCE: u64 = 100_000;

/// How live entities are picked for update, transfer and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum KeySelection {
    /// Pure random selection.
    #[default]
    Random,
    /// Cycles through live entities in creation order.
    RoundRobin,
    /// Skewed toward the oldest entities (hotspots).
    Zipf {
        /// Zipf exponent (1 = mild skew, 2+ = heavy skew).
        exponent: u32,
    },
}

/// Live entities of one kind.
#[derive(Debug, Clone, Default)]
struct KindPool {
    live: Vec<EntityKey>,
    balances: Vec<u64>,
    round_robin: usize,
}

impl KindPool {
    fn index_of(&self, key: &EntityKey) -> Option<usize> {
        self.live.iter().position(|k| k == key)
    }
}

/// Entities created by one node.
#[derive(Debug, Clone)]
pub struct EntityPool {
    node: NodeId,
    shard: u64,
    next_account: u64,
    selection: KeySelection,
    accounts: KindPool,
    queues: KindPool,
}

impl EntityPool {
    /// Create an empty pool in `node`'s realm on `shard`.
    pub fn new(node: NodeId, shard: u64) -> Self {
        Self {
            node,
            shard,
            next_account: 1,
            selection: KeySelection::default(),
            accounts: KindPool::default(),
            queues: KindPool::default(),
        }
    }

    /// Set the selection mode.
    pub fn with_selection(mut self, selection: KeySelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn pool(&self, kind: EntityKind) -> &KindPool {
        match kind {
            EntityKind::Account => &self.accounts,
            EntityKind::Queue => &self.queues,
        }
    }

    fn pool_mut(&mut self, kind: EntityKind) -> &mut KindPool {
        match kind {
            EntityKind::Account => &mut self.accounts,
            EntityKind::Queue => &mut self.queues,
        }
    }

    /// Allocate a fresh key and record it as live with its initial balance.
    pub fn create(&mut self, kind: EntityKind) -> (EntityKey, u64) {
        let key = EntityKey::new(self.shard, self.node.0, self.next_account);
        self.next_account += 1;
        let balance = INIT_BALANCE + key.account;
        let pool = self.pool_mut(kind);
        pool.live.push(key);
        pool.balances.push(balance);
        (key, balance)
    }

    /// Number of live entities of a kind.
    pub fn live(&self, kind: EntityKind) -> usize {
        self.pool(kind).live.len()
    }

    /// Tracked balance of a live entity.
    pub fn balance(&self, kind: EntityKind, key: &EntityKey) -> Option<u64> {
        let pool = self.pool(kind);
        pool.index_of(key).map(|i| pool.balances[i])
    }

    /// Pick one live entity.
    pub fn pick<R: Rng + ?Sized>(&mut self, kind: EntityKind, rng: &mut R) -> Option<EntityKey> {
        let len = self.live(kind);
        if len == 0 {
            return None;
        }
        let idx = self.select_index(kind, len, rng);
        Some(self.pool(kind).live[idx])
    }

    /// Pick two distinct live entities.
    pub fn pick_pair<R: Rng + ?Sized>(
        &mut self,
        kind: EntityKind,
        rng: &mut R,
    ) -> Option<(EntityKey, EntityKey)> {
        let len = self.live(kind);
        if len < 2 {
            return None;
        }
        let first = self.select_index(kind, len, rng);
        let mut second = self.select_index(kind, len, rng);
        while second == first {
            second = match self.selection {
                KeySelection::RoundRobin => (first + 1) % len,
                _ => rng.gen_range(0..len),
            };
        }
        let pool = self.pool(kind);
        Some((pool.live[first], pool.live[second]))
    }

    fn select_index<R: Rng + ?Sized>(&mut self, kind: EntityKind, len: usize, rng: &mut R) -> usize {
        match self.selection {
            KeySelection::Random => rng.gen_range(0..len),
            KeySelection::RoundRobin => {
                let pool = self.pool_mut(kind);
                let idx = pool.round_robin % len;
                pool.round_robin = pool.round_robin.wrapping_add(1);
                idx
            }
            KeySelection::Zipf { exponent } => zipf_index(len, exponent, rng),
        }
    }

    /// Record a new balance for a live entity.
    pub fn set_balance(&mut self, kind: EntityKind, key: &EntityKey, balance: u64) {
        let pool = self.pool_mut(kind);
        if let Some(i) = pool.index_of(key) {
            pool.balances[i] = balance;
        }
    }

    /// Move `amount` between two live entities if `from` can cover it.
    pub fn transfer(&mut self, kind: EntityKind, from: &EntityKey, to: &EntityKey, amount: u64) -> bool {
        let pool = self.pool_mut(kind);
        let (Some(f), Some(t)) = (pool.index_of(from), pool.index_of(to)) else {
            return false;
        };
        if pool.balances[f] < amount {
            return false;
        }
        pool.balances[f] -= amount;
        pool.balances[t] = pool.balances[t].saturating_add(amount);
        true
    }

    /// Forget a deleted entity.
    pub fn remove(&mut self, kind: EntityKind, key: &EntityKey) -> bool {
        let pool = self.pool_mut(kind);
        match pool.index_of(key) {
            Some(i) => {
                pool.live.remove(i);
                pool.balances.remove(i);
                true
            }
            None => false,
        }
    }
}

/// Zipf-distributed index by inverse transform sampling.
fn zipf_index<R: Rng + ?Sized>(n: usize, exponent: u32, rng: &mut R) -> usize {
    let exp = exponent.max(1) as f64;
    let u: f64 = rng.gen();
    let idx = ((n as f64).powf(1.0 - u)).powf(1.0 / exp) as usize;
    idx.min(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_keys_live_in_node_realm() {
        let mut pool = EntityPool::new(NodeId(3), 0);
        let (a, balance) = pool.create(EntityKind::Account);
        let (b, _) = pool.create(EntityKind::Queue);

        assert_eq!(a, EntityKey::new(0, 3, 1));
        assert_eq!(b, EntityKey::new(0, 3, 2));
        assert_eq!(balance, INIT_BALANCE + 1);
        assert_eq!(pool.live(EntityKind::Account), 1);
        assert_eq!(pool.live(EntityKind::Queue), 1);
    }

    #[test]
    fn test_pick_pair_is_distinct() {
        let mut pool = EntityPool::new(NodeId(0), 0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        assert!(pool.pick_pair(EntityKind::Account, &mut rng).is_none());

        for _ in 0..3 {
            pool.create(EntityKind::Account);
        }
        for _ in 0..50 {
            let (a, b) = pool.pick_pair(EntityKind::Account, &mut rng).unwrap();
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_round_robin_cycles() {
        let mut pool = EntityPool::new(NodeId(0), 0).with_selection(KeySelection::RoundRobin);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let keys: Vec<_> = (0..3).map(|_| pool.create(EntityKind::Account).0).collect();

        let picked: Vec<_> = (0..4)
            .map(|_| pool.pick(EntityKind::Account, &mut rng).unwrap())
            .collect();
        assert_eq!(picked, vec![keys[0], keys[1], keys[2], keys[0]]);
    }

    #[test]
    fn test_zipf_stays_in_range() {
        let mut pool = EntityPool::new(NodeId(0), 0).with_selection(KeySelection::Zipf { exponent: 2 });
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..10 {
            pool.create(EntityKind::Queue);
        }
        for _ in 0..100 {
            assert!(pool.pick(EntityKind::Queue, &mut rng).is_some());
        }
    }

    #[test]
    fn test_transfer_and_remove() {
        let mut pool = EntityPool::new(NodeId(1), 0);
        let (a, a_balance) = pool.create(EntityKind::Account);
        let (b, b_balance) = pool.create(EntityKind::Account);

        assert!(pool.transfer(EntityKind::Account, &a, &b, 1_000));
        assert_eq!(pool.balance(EntityKind::Account, &a), Some(a_balance - 1_000));
        assert_eq!(pool.balance(EntityKind::Account, &b), Some(b_balance + 1_000));
        assert!(!pool.transfer(EntityKind::Account, &a, &b, u64::MAX), "cannot overdraw");

        assert!(pool.remove(EntityKind::Account, &a));
        assert!(!pool.remove(EntityKind::Account, &a));
        assert_eq!(pool.balance(EntityKind::Account, &a), None);
    }
}
