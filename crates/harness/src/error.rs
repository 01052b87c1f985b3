//! Harness errors.

use crate::config::ConfigError;
use replaygate_workload::GenerateError;
use thiserror::Error;

/// Errors that abort a harness run.
///
/// Everything the replay path can recover from is counted in the report
/// instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to encode {what}: {source}")]
    Generate {
        what: &'static str,
        #[source]
        source: GenerateError,
    },

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {0} panicked")]
    WorkerPanicked(String),
}
