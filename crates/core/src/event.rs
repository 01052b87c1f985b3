//! Inbound events delivered to the replay state machine.

use crate::{PlatformStatus, Round};
use replaygate_types::{NodeId, RoundNumber, SignatureStatus};

/// Signature state of one system transaction, delivered on the side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemSignature {
    /// Node whose system transaction carried the signature.
    pub creator: NodeId,
    pub status: SignatureStatus,
}

/// Events consumed by [`crate::StateMachine::handle`].
#[derive(Debug, Clone)]
pub enum Event {
    /// An ordered round of application transactions.
    ConsensusRound(Round),

    /// Signature states of the system transactions in a round.
    SystemTransactions {
        round: RoundNumber,
        signatures: Vec<SystemSignature>,
    },

    /// The node finished a reconnect and must rebuild derived structures
    /// from its latest snapshot.
    Reconnected,

    /// The platform changed status.
    StatusChanged(PlatformStatus),
}

impl Event {
    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ConsensusRound(_) => "ConsensusRound",
            Event::SystemTransactions { .. } => "SystemTransactions",
            Event::Reconnected => "Reconnected",
            Event::StatusChanged(_) => "StatusChanged",
        }
    }
}
