//! Replicated state for replaygate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ReplicatedStateMachine                     │
//! │                                                             │
//! │   MutableState ──publish──► SnapshotArena ◄── readers       │
//! │        │                                                    │
//! │        ├── ExpirationQueue (earliest expiry per entity)     │
//! │        ├── ExpectedMap     (shadow model, divergence flags) │
//! │        └── QuorumGate      (control votes)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The machine is the only writer. Readers take [`SnapshotHandle`]s from
//! the arena and never block the apply path.

mod arena;
mod counters;
mod entity;
mod expected;
mod expiration;
mod export;
mod limiter;
mod machine;
mod snapshot;

pub use arena::{SnapshotArena, SnapshotHandle};
pub use counters::{TransactionCounter, TransactionCounters};
pub use entity::{EntityValue, Record};
pub use expected::{
    Divergence, DivergenceReason, DivergenceSummary, ExpectedFailure, ExpectedMap,
    ExpectedStatus, ExpectedValue,
};
pub use expiration::{ExpirationEntry, ExpirationQueue};
pub use export::{
    expected_state_file_name, export_expected_state, load_expected_state, ExportError,
    ExportedState,
};
pub use limiter::{ThresholdLimiter, DEFAULT_LOG_THRESHOLD};
pub use machine::{ApplyStats, MachineConfig, PurgeStats, ReplicatedStateMachine};
pub use snapshot::{Applied, ApplyError, MutableState, SnapshotError, StateSnapshot};
