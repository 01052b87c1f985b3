//! Interfaces to the external ordering engine.
//!
//! The ordering engine supplies ordered, timestamped transactions and
//! accepts new ones. Everything the harness needs from it is expressed by
//! the types and traits in this module.

use replaygate_types::{ConsensusTimestamp, NodeId, RoundNumber};
use std::time::Duration;

/// One transaction as delivered by the ordering engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredTransaction {
    /// Node whose event carried the transaction.
    pub creator: NodeId,
    /// Software version of the creating node.
    pub software_version: u32,
    /// Creator's wall-clock time when the event was created.
    pub time_created: ConsensusTimestamp,
    pub consensus_timestamp: ConsensusTimestamp,
    pub payload: Vec<u8>,
}

/// An ordered round of transactions.
///
/// Every node receives identical rounds in identical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub number: RoundNumber,
    pub transactions: Vec<DeliveredTransaction>,
}

impl Round {
    /// Create a new round.
    pub fn new(number: RoundNumber, transactions: Vec<DeliveredTransaction>) -> Self {
        Self {
            number,
            transactions,
        }
    }

    /// Consensus timestamp of the last transaction, if any.
    pub fn last_timestamp(&self) -> Option<ConsensusTimestamp> {
        self.transactions.last().map(|t| t.consensus_timestamp)
    }

    /// Total payload bytes in the round.
    pub fn payload_bytes(&self) -> usize {
        self.transactions.iter().map(|t| t.payload.len()).sum()
    }
}

/// Platform status notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformStatus {
    Starting,
    Active,
    /// The node fell behind and must reconnect.
    Behind,
    Reconnecting,
    Freezing,
    FreezeComplete,
}

/// Outbound path to the ordering engine.
pub trait OrderingEngine: Send + Sync {
    /// Offer a transaction for ordering.
    ///
    /// Non-blocking. Returns false when the engine cannot take it right now;
    /// the caller must retry the same bytes later.
    fn create_transaction(&self, bytes: Vec<u8>) -> bool;
}

/// Live network-wide throughput metrics.
///
/// Values are eventually-consistent snapshots and are not synchronized with
/// local state.
pub trait NetworkMetrics: Send + Sync {
    /// Consensus events per second across the network.
    fn events_per_sec(&self) -> f64;

    /// Consensus rounds per second.
    fn rounds_per_sec(&self) -> f64;

    /// Average number of transactions per consensus event.
    fn transactions_per_event(&self) -> f64;

    /// Average consensus-to-consensus latency.
    fn c2c_latency(&self) -> Duration;
}

#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::{FixedNetworkMetrics, RecordingEngine};

#[cfg(any(test, feature = "test-utils"))]
mod test_utils {
    use super::{NetworkMetrics, OrderingEngine};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Engine double that records every accepted submission.
    #[derive(Debug, Default)]
    pub struct RecordingEngine {
        submitted: Mutex<Vec<Vec<u8>>>,
        rejecting: AtomicBool,
    }

    impl RecordingEngine {
        /// Create a new engine that accepts everything.
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the engine reject (or accept again) new submissions.
        pub fn set_rejecting(&self, rejecting: bool) {
            self.rejecting.store(rejecting, Ordering::SeqCst);
        }

        /// Copy of all accepted submissions.
        pub fn submitted(&self) -> Vec<Vec<u8>> {
            self.submitted.lock().clone()
        }

        /// Number of accepted submissions.
        pub fn len(&self) -> usize {
            self.submitted.lock().len()
        }

        /// Check if nothing was accepted.
        pub fn is_empty(&self) -> bool {
            self.submitted.lock().is_empty()
        }
    }

    impl OrderingEngine for RecordingEngine {
        fn create_transaction(&self, bytes: Vec<u8>) -> bool {
            if self.rejecting.load(Ordering::SeqCst) {
                return false;
            }
            self.submitted.lock().push(bytes);
            true
        }
    }

    /// Metrics double with settable values.
    #[derive(Debug)]
    pub struct FixedNetworkMetrics {
        values: Mutex<(f64, f64, f64, Duration)>,
    }

    impl Default for FixedNetworkMetrics {
        fn default() -> Self {
            Self {
                values: Mutex::new((0.0, 0.0, 0.0, Duration::ZERO)),
            }
        }
    }

    impl FixedNetworkMetrics {
        /// Create metrics that report zero for everything.
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_events_per_sec(&self, value: f64) {
            self.values.lock().0 = value;
        }

        pub fn set_rounds_per_sec(&self, value: f64) {
            self.values.lock().1 = value;
        }

        pub fn set_transactions_per_event(&self, value: f64) {
            self.values.lock().2 = value;
        }

        pub fn set_c2c_latency(&self, value: Duration) {
            self.values.lock().3 = value;
        }
    }

    impl NetworkMetrics for FixedNetworkMetrics {
        fn events_per_sec(&self) -> f64 {
            self.values.lock().0
        }

        fn rounds_per_sec(&self) -> f64 {
            self.values.lock().1
        }

        fn transactions_per_event(&self) -> f64 {
            self.values.lock().2
        }

        fn c2c_latency(&self) -> Duration {
            self.values.lock().3
        }
    }
}
