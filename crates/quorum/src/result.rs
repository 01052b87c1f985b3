//! Serializable quorum tally.

use replaygate_types::{ControlAction, ControlType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle of one control type's tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumPhase {
    /// No votes in the current epoch.
    #[default]
    Idle,
    /// Votes recorded, below the threshold.
    Armed,
    /// Quorum reached.
    Fired,
}

impl QuorumPhase {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            QuorumPhase::Idle => 0,
            QuorumPhase::Armed => 1,
            QuorumPhase::Fired => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => QuorumPhase::Armed,
            2 => QuorumPhase::Fired,
            _ => QuorumPhase::Idle,
        }
    }
}

/// Tally for a single control type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Roster indices that voted in the current epoch.
    pub voters: BTreeSet<usize>,
    /// Summed weight of `voters`.
    pub weight: u64,
    pub phase: QuorumPhase,
    /// Incremented every time the type fires.
    pub epoch: u64,
    /// The vote that completed the last quorum.
    pub fired_by: Option<ControlAction>,
}

/// Running tally of control votes for the whole cluster.
///
/// This is the value stored in the replicated state; cloning it is a deep
/// copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumResult {
    tallies: [Tally; 4],
    total_weight: u64,
    roster_size: usize,
}

impl QuorumResult {
    /// Create an empty result for a roster.
    pub fn new(roster_size: usize, total_weight: u64) -> Self {
        Self {
            tallies: Default::default(),
            total_weight,
            roster_size,
        }
    }

    /// Whether the type is in the `Fired` phase.
    pub fn has_quorum(&self, kind: ControlType) -> bool {
        self.tally(kind).phase == QuorumPhase::Fired
    }

    /// Current phase of a type.
    pub fn phase(&self, kind: ControlType) -> QuorumPhase {
        self.tally(kind).phase
    }

    /// Tally of a type.
    pub fn tally(&self, kind: ControlType) -> &Tally {
        &self.tallies[kind.index()]
    }

    pub(crate) fn tally_mut(&mut self, kind: ControlType) -> &mut Tally {
        &mut self.tallies[kind.index()]
    }

    /// Total voting weight of the roster this result was built for.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Size of the roster this result was built for.
    pub fn roster_size(&self) -> usize {
        self.roster_size
    }

    /// Roster indices that voted for a type in the current epoch.
    pub fn voters(&self, kind: ControlType) -> impl Iterator<Item = usize> + '_ {
        self.tally(kind).voters.iter().copied()
    }

    /// Number of times a type has fired.
    pub fn epoch(&self, kind: ControlType) -> u64 {
        self.tally(kind).epoch
    }
}
