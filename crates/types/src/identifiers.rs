//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Node identifier, as it appears in the roster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The node that owns cluster-wide duties (freeze, expected-map snapshots).
    pub const LEADER: Self = NodeId(0);

    /// Whether this is node 0.
    pub fn is_leader(self) -> bool {
        self == Self::LEADER
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Consensus timestamp in nanoseconds since the Unix epoch.
///
/// Assigned by the ordering engine. Strictly increasing within one node's
/// replay stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ConsensusTimestamp(pub u64);

impl ConsensusTimestamp {
    /// The zero timestamp.
    pub const ZERO: Self = ConsensusTimestamp(0);

    /// Minimum spacing between two consecutive consensus timestamps.
    pub const MIN_SPACING_NANOS: u64 = 1_000;

    /// Create from whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        ConsensusTimestamp(secs.saturating_mul(1_000_000_000))
    }

    /// Create from a duration since the epoch.
    pub fn from_duration(duration: Duration) -> Self {
        ConsensusTimestamp(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Get the raw nanosecond value.
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Timestamp shifted forward by `nanos`.
    pub fn plus_nanos(self, nanos: u64) -> Self {
        ConsensusTimestamp(self.0.saturating_add(nanos))
    }

    /// Timestamp shifted forward by a duration.
    pub fn plus(self, duration: Duration) -> Self {
        self.plus_nanos(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_since(self, earlier: ConsensusTimestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for ConsensusTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09}",
            self.0 / 1_000_000_000,
            self.0 % 1_000_000_000
        )
    }
}

/// Consensus round number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RoundNumber(pub u64);

impl RoundNumber {
    /// First round.
    pub const GENESIS: Self = RoundNumber(0);

    /// Get the next round number.
    pub fn next(self) -> Self {
        RoundNumber(self.0 + 1)
    }
}

impl fmt::Display for RoundNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round({})", self.0)
    }
}

/// Vote power (roster weight).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VotePower(pub u64);

impl VotePower {
    /// Create from u64.
    pub fn new(power: u64) -> Self {
        VotePower(power)
    }

    /// Get the raw value.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Calculate total vote power from a list.
    pub fn sum(powers: &[VotePower]) -> u64 {
        powers.iter().map(|p| p.0).sum()
    }

    /// Whether `voted` is a strict majority of `total` (> 1/2).
    pub fn has_majority(voted: u64, total: u64) -> bool {
        (voted as u128) * 2 > total as u128
    }
}

impl fmt::Display for VotePower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of an entity in the replicated entity map.
///
/// Rendered (and serialized) as `shard.realm.account`, so it can key JSON
/// maps. Generators put the originating node in the realm so that keys never
/// collide between submitters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(into = "String", try_from = "String")]
pub struct EntityKey {
    pub shard: u64,
    pub realm: u64,
    pub account: u64,
}

impl EntityKey {
    /// Create a new entity key.
    pub fn new(shard: u64, realm: u64, account: u64) -> Self {
        Self {
            shard,
            realm,
            account,
        }
    }

    /// Little-endian byte encoding, used for hashing.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[..8].copy_from_slice(&self.shard.to_le_bytes());
        out[8..16].copy_from_slice(&self.realm.to_le_bytes());
        out[16..].copy_from_slice(&self.account.to_le_bytes());
        out
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.account)
    }
}

impl FromStr for EntityKey {
    type Err = EntityKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u64, EntityKeyParseError> {
            parts
                .next()
                .ok_or_else(|| EntityKeyParseError(s.to_string()))?
                .parse()
                .map_err(|_| EntityKeyParseError(s.to_string()))
        };
        let key = EntityKey::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(EntityKeyParseError(s.to_string()));
        }
        Ok(key)
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for EntityKey {
    type Error = EntityKeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An entity key string was not `shard.realm.account`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity key: {0:?}")]
pub struct EntityKeyParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_power_majority() {
        let total = 5;

        assert!(!VotePower::has_majority(2, total)); // 2/5 = 40%
        assert!(VotePower::has_majority(3, total)); // 3/5 = 60%
        assert!(VotePower::has_majority(5, total));
    }

    #[test]
    fn test_vote_power_majority_boundary_conditions() {
        // Exactly half is not a majority
        assert!(!VotePower::has_majority(2, 4), "Exactly 1/2 should not be quorum");
        assert!(VotePower::has_majority(3, 4), "3/4 should be quorum");

        assert!(VotePower::has_majority(1, 1), "1/1 should be quorum");
        assert!(!VotePower::has_majority(0, 1), "0/1 should not be quorum");
        assert!(!VotePower::has_majority(0, 0), "0/0 should not be quorum");

        // Unequal weights: [3, 2, 2, 1] = 8 total, need > 4
        assert!(!VotePower::has_majority(4, 8));
        assert!(VotePower::has_majority(5, 8));
    }

    #[test]
    fn test_vote_power_majority_large_values() {
        assert!(VotePower::has_majority(u64::MAX, u64::MAX));
        assert!(!VotePower::has_majority(u64::MAX / 2, u64::MAX));
    }

    #[test]
    fn test_consensus_timestamp_arithmetic() {
        let t = ConsensusTimestamp::from_secs(2);
        assert_eq!(t.as_nanos(), 2_000_000_000);
        assert_eq!(t.plus_nanos(5).as_nanos(), 2_000_000_005);
        assert_eq!(
            t.plus(Duration::from_millis(1)).saturating_since(t),
            Duration::from_millis(1)
        );
        assert_eq!(ConsensusTimestamp::ZERO.saturating_since(t), Duration::ZERO);
        assert_eq!(t.to_string(), "2.000000000");
    }

    #[test]
    fn test_entity_key_display_and_bytes() {
        let key = EntityKey::new(0, 3, 42);
        assert_eq!(key.to_string(), "0.3.42");
        assert_ne!(key.to_bytes(), EntityKey::new(0, 3, 43).to_bytes());
    }

    #[test]
    fn test_entity_key_parse() {
        assert_eq!("1.2.3".parse::<EntityKey>(), Ok(EntityKey::new(1, 2, 3)));
        assert!("1.2".parse::<EntityKey>().is_err());
        assert!("1.2.3.4".parse::<EntityKey>().is_err());
        assert!("a.b.c".parse::<EntityKey>().is_err());
    }
}
