//! Outbound actions requested by the replay state machine.

use replaygate_types::{ConsensusTimestamp, ControlType, EntityKey, NodeId};

/// Actions for the runner to execute.
///
/// The state machine never writes files or submits transactions itself; it
/// describes what should happen and the orchestrator does it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Phase Transitions
    // ═══════════════════════════════════════════════════════════════════════
    /// A control type reached quorum while replaying the given transaction.
    QuorumReached {
        control: ControlType,
        timestamp: ConsensusTimestamp,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Exports
    // ═══════════════════════════════════════════════════════════════════════
    /// Write the expected map to disk, keyed by (node, timestamp).
    ExportExpectedState {
        node: NodeId,
        timestamp: ConsensusTimestamp,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Platform
    // ═══════════════════════════════════════════════════════════════════════
    /// A freeze was scheduled by consensus.
    FreezeScheduled { start: ConsensusTimestamp },

    /// An entity diverged from the expected map.
    DivergenceDetected { key: EntityKey, reason: String },
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::QuorumReached { .. } => "QuorumReached",
            Action::ExportExpectedState { .. } => "ExportExpectedState",
            Action::FreezeScheduled { .. } => "FreezeScheduled",
            Action::DivergenceDetected { .. } => "DivergenceDetected",
        }
    }
}
