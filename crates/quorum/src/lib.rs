//! Cluster-wide agreement on control actions.
//!
//! Every node votes for control types by submitting control transactions.
//! The [`QuorumGate`] counts those votes as they are replayed and fires
//! once a strict weighted majority of the roster agrees.

mod gate;
mod result;

pub use gate::{QuorumGate, QuorumListener, RecordOutcome};
pub use result::{QuorumPhase, QuorumResult, Tally};
