//! Control actions that move the cluster between test phases.

use crate::ConsensusTimestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};

/// Kind of control signal a node can vote for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    /// Stop submitting and snapshot the expected state.
    EnterValidation,
    /// Validation done; resume or finish.
    ExitValidation,
    /// Pause submission so lagging nodes can catch up.
    EnterSync,
    /// Resume after a sync pause.
    ExitSync,
}

impl ControlType {
    /// All control types, in tally order.
    pub const ALL: [ControlType; 4] = [
        ControlType::EnterValidation,
        ControlType::ExitValidation,
        ControlType::EnterSync,
        ControlType::ExitSync,
    ];

    /// Dense index into per-type arrays.
    pub fn index(self) -> usize {
        match self {
            ControlType::EnterValidation => 0,
            ControlType::ExitValidation => 1,
            ControlType::EnterSync => 2,
            ControlType::ExitSync => 3,
        }
    }

    /// The type that closes (or opens) the same phase.
    pub fn counterpart(self) -> ControlType {
        match self {
            ControlType::EnterValidation => ControlType::ExitValidation,
            ControlType::ExitValidation => ControlType::EnterValidation,
            ControlType::EnterSync => ControlType::ExitSync,
            ControlType::ExitSync => ControlType::EnterSync,
        }
    }

    /// Whether this type opens a paused phase.
    pub fn is_enter(self) -> bool {
        matches!(self, ControlType::EnterValidation | ControlType::EnterSync)
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlType::EnterValidation => "ENTER_VALIDATION",
            ControlType::ExitValidation => "EXIT_VALIDATION",
            ControlType::EnterSync => "ENTER_SYNC",
            ControlType::ExitSync => "EXIT_SYNC",
        };
        f.write_str(name)
    }
}

/// A node's vote for a control type.
///
/// Identity is the type alone: two actions with different timestamps but the
/// same type are equal. The quorum counts distinct voters per type, so the
/// timestamp only records when the vote reached consensus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlAction {
    pub timestamp: ConsensusTimestamp,
    pub kind: ControlType,
}

impl ControlAction {
    /// Create a new control action.
    pub fn new(timestamp: ConsensusTimestamp, kind: ControlType) -> Self {
        Self { timestamp, kind }
    }
}

impl PartialEq for ControlAction {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for ControlAction {}

impl StdHash for ControlAction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_control_action_equality_ignores_timestamp() {
        let a = ControlAction::new(ConsensusTimestamp(1), ControlType::EnterSync);
        let b = ControlAction::new(ConsensusTimestamp(99), ControlType::EnterSync);
        let c = ControlAction::new(ConsensusTimestamp(1), ControlType::ExitSync);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_counterparts_pair_up() {
        for kind in ControlType::ALL {
            assert_eq!(kind.counterpart().counterpart(), kind);
            assert_ne!(kind.is_enter(), kind.counterpart().is_enter());
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ControlType::EnterValidation).unwrap();
        assert_eq!(json, "\"ENTER_VALIDATION\"");
    }
}
