//! In-process test harness for replaygate.
//!
//! Runs a cluster of nodes against a local ordering engine. Every node owns
//! a submission loop and a delivery worker; they share nothing but the
//! engine and a peer list used for reconnects.
//!
//! ```text
//!                      ┌─────────────────────────┐
//!   Orchestrator(n) ──►│   LocalOrderingEngine   │──► Round ──► DeliveryWorker(n)
//!     │  ▲             │  per-node queues, fixed │              │ replicated state
//!     │  │             │  interval, fan-out      │              │ quorum gate
//!     │  │             └─────────────────────────┘              │ exports
//!     │  └────────────────── PhaseSignal ─────────────────────────┘
//!     ▼
//!   SubmissionGovernor (goal, throttles, quorum pauses)
//! ```
//!
//! A run passes when every node sees EXIT_VALIDATION reach quorum and no
//! node reports more divergences than the configured threshold.

pub mod cluster;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod stats;

pub use cluster::Cluster;
pub use config::{
    ConfigError, GeneratorConfig, HarnessConfig, ReplayConfig, SubmitOptions, WorkloadConfig,
};
pub use delivery::{DeliveryOutcome, DeliveryWorker, FinishedDelivery, PhaseSignal};
pub use engine::{EngineConfig, EngineHandle, EngineSummary, LocalOrderingEngine};
pub use error::HarnessError;
pub use orchestrator::{Orchestrator, SubmitOutcome};
pub use report::{NodeReport, RunReport};
pub use stats::{NodeSample, StatsSampler};
