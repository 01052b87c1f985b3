//! Roster trait and static implementation.

use crate::{NodeId, VotePower};
use serde::{Deserialize, Serialize};

/// Size and weight oracle for the cluster.
///
/// Quorum counting, counter sizing and the submission governor only ever
/// need these answers, so the ordering engine's address book is reduced to
/// this trait.
pub trait Roster: Send + Sync {
    /// Ordered roster members.
    fn nodes(&self) -> &[NodeId];

    /// Voting weight of a node.
    fn weight(&self, node: NodeId) -> Option<u64>;

    /// Total voting weight.
    fn total_weight(&self) -> u64;

    // Derived methods

    /// Number of roster members.
    fn size(&self) -> usize {
        self.nodes().len()
    }

    /// Position of a node in the roster.
    fn index_of(&self, node: NodeId) -> Option<usize> {
        self.nodes().iter().position(|n| *n == node)
    }

    /// Node at a roster position.
    fn node_at(&self, index: usize) -> Option<NodeId> {
        self.nodes().get(index).copied()
    }

    /// Weight of the node at a roster position.
    fn weight_at(&self, index: usize) -> u64 {
        self.node_at(index)
            .and_then(|node| self.weight(node))
            .unwrap_or(0)
    }

    /// Number of members with non-zero weight.
    fn number_with_weight(&self) -> usize {
        self.nodes()
            .iter()
            .filter(|n| self.weight(**n).unwrap_or(0) > 0)
            .count()
    }

    /// Check if the given weight is a strict majority (> 1/2).
    fn has_quorum(&self, voted_weight: u64) -> bool {
        VotePower::has_majority(voted_weight, self.total_weight())
    }

    /// Minimum weight required for quorum.
    fn quorum_threshold(&self) -> u64 {
        self.total_weight() / 2 + 1
    }

    /// Check if a node is a roster member.
    fn contains(&self, node: NodeId) -> bool {
        self.index_of(node).is_some()
    }
}

/// One roster entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: NodeId,
    #[serde(default = "default_weight")]
    pub weight: u64,
}

fn default_weight() -> u64 {
    1
}

/// Fixed roster, built once at startup.
#[derive(Debug, Clone)]
pub struct StaticRoster {
    nodes: Vec<NodeId>,
    weights: Vec<u64>,
    total_weight: u64,
}

impl StaticRoster {
    /// Build a roster from explicit entries.
    pub fn new(entries: &[RosterEntry]) -> Result<Self, RosterError> {
        if entries.is_empty() {
            return Err(RosterError::Empty);
        }

        let mut nodes = Vec::with_capacity(entries.len());
        let mut weights = Vec::with_capacity(entries.len());
        for entry in entries {
            if nodes.contains(&entry.id) {
                return Err(RosterError::DuplicateNode(entry.id));
            }
            nodes.push(entry.id);
            weights.push(entry.weight);
        }

        let total_weight = weights.iter().try_fold(0u64, |acc, w| acc.checked_add(*w));
        let total_weight = total_weight.ok_or(RosterError::WeightOverflow)?;
        if total_weight == 0 {
            return Err(RosterError::ZeroWeight);
        }

        Ok(Self {
            nodes,
            weights,
            total_weight,
        })
    }

    /// `count` nodes with ids `0..count` and weight 1 each.
    pub fn uniform(count: u64) -> Result<Self, RosterError> {
        let entries: Vec<_> = (0..count)
            .map(|i| RosterEntry {
                id: NodeId(i),
                weight: 1,
            })
            .collect();
        Self::new(&entries)
    }
}

impl Roster for StaticRoster {
    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn weight(&self, node: NodeId) -> Option<u64> {
        self.index_of(node).map(|i| self.weights[i])
    }

    fn total_weight(&self) -> u64 {
        self.total_weight
    }
}

/// Errors that can occur when building a roster.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("roster is empty")]
    Empty,

    #[error("node {0} appears more than once")]
    DuplicateNode(NodeId),

    #[error("total roster weight is zero")]
    ZeroWeight,

    #[error("total roster weight overflows u64")]
    WeightOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_roster_quorum() {
        let roster = StaticRoster::uniform(5).unwrap();
        assert_eq!(roster.size(), 5);
        assert_eq!(roster.total_weight(), 5);
        assert_eq!(roster.quorum_threshold(), 3);
        assert!(!roster.has_quorum(2));
        assert!(roster.has_quorum(3));
    }

    #[test]
    fn test_weighted_roster() {
        let roster = StaticRoster::new(&[
            RosterEntry {
                id: NodeId(10),
                weight: 3,
            },
            RosterEntry {
                id: NodeId(11),
                weight: 1,
            },
            RosterEntry {
                id: NodeId(12),
                weight: 0,
            },
        ])
        .unwrap();

        assert_eq!(roster.index_of(NodeId(11)), Some(1));
        assert_eq!(roster.weight_at(0), 3);
        assert_eq!(roster.weight_at(7), 0);
        assert_eq!(roster.number_with_weight(), 2);
        // 3 of 4 is a majority on its own
        assert!(roster.has_quorum(roster.weight_at(0)));
        assert_eq!(roster.quorum_threshold(), 3);
    }

    #[test]
    fn test_roster_validation() {
        assert_eq!(StaticRoster::new(&[]).unwrap_err(), RosterError::Empty);

        let dup = [
            RosterEntry {
                id: NodeId(1),
                weight: 1,
            },
            RosterEntry {
                id: NodeId(1),
                weight: 1,
            },
        ];
        assert_eq!(
            StaticRoster::new(&dup).unwrap_err(),
            RosterError::DuplicateNode(NodeId(1))
        );

        let zero = [RosterEntry {
            id: NodeId(0),
            weight: 0,
        }];
        assert_eq!(StaticRoster::new(&zero).unwrap_err(), RosterError::ZeroWeight);
    }
}
