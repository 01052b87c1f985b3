//! Transaction payload generation.
//!
//! Generators decide *which* payload type comes next; the
//! [`PayloadFactory`] turns a type into signed, padded wire bytes and keeps
//! track of the entities this node has created.
//!
//! - [`WeightedPayloadGenerator`]: fixed type or weighted (type, size) draw
//! - [`SequentialSchedule`]: staged amounts with sync and loop stages
//! - [`TreePayloadGenerator`]: tree/contract leaf creates and updates
//! - [`InterleavedGenerator`]: coin flip between two generators

mod distribution;
mod entities;
mod factory;
mod interleave;
mod progress;
mod sequential;
mod tree;
mod weighted;

pub use distribution::{DistributionBucket, DistributionError, PayloadDistribution, DRAW_RANGE};
pub use entities::{EntityPool, KeySelection, INIT_BALANCE};
pub use factory::{FactoryConfig, GenerateError, PayloadFactory, TRANSFER_AMOUNT};
pub use interleave::InterleavedGenerator;
pub use progress::ProgressTracker;
pub use sequential::{SequentialSchedule, Stage, StageKind};
pub use tree::{TreeMix, TreePayloadGenerator};
pub use weighted::{PayloadMode, WeightedPayloadGenerator};

use replaygate_types::{ControlType, EntityKey, PayloadType};

/// One generated payload, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPayload {
    pub bytes: Vec<u8>,
    pub payload_type: PayloadType,
    /// Entity or leaf the payload is about, if any.
    pub key: Option<EntityKey>,
    /// The signature was deliberately broken.
    pub invalid_sig: bool,
}

impl GeneratedPayload {
    pub fn new(bytes: Vec<u8>, payload_type: PayloadType, key: Option<EntityKey>) -> Self {
        Self {
            bytes,
            payload_type,
            key,
            invalid_sig: false,
        }
    }

    pub fn with_invalid_sig(mut self, invalid_sig: bool) -> Self {
        self.invalid_sig = invalid_sig;
        self
    }
}

/// What a generator produced for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    Payload(GeneratedPayload),
    /// The draw fell past the last bucket; nothing to submit this time.
    NoMatch,
    /// The schedule asks the orchestrator to send a control transaction.
    Control(ControlType),
    /// Nothing more will be generated.
    Exhausted,
}

impl Generated {
    /// The payload, if one was produced.
    pub fn into_payload(self) -> Option<GeneratedPayload> {
        match self {
            Generated::Payload(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Generated::Exhausted)
    }
}

/// Trait for generating transaction payloads.
pub trait PayloadGenerator: Send {
    /// Produce the next payload.
    fn next_payload(&mut self) -> Result<Generated, GenerateError>;

    /// TPS the current stage asks for, overriding the governor's goal.
    fn customized_tps(&self) -> Option<f64> {
        None
    }

    /// Encoded control transaction from this generator's node.
    fn control(&self, control: ControlType) -> Result<Vec<u8>, GenerateError>;

    /// Encoded freeze transaction from this generator's node.
    fn freeze(&self, start_after_secs: u64) -> Result<Vec<u8>, GenerateError>;
}

impl<G: PayloadGenerator + ?Sized> PayloadGenerator for Box<G> {
    fn next_payload(&mut self) -> Result<Generated, GenerateError> {
        (**self).next_payload()
    }

    fn customized_tps(&self) -> Option<f64> {
        (**self).customized_tps()
    }

    fn control(&self, control: ControlType) -> Result<Vec<u8>, GenerateError> {
        (**self).control(control)
    }

    fn freeze(&self, start_after_secs: u64) -> Result<Vec<u8>, GenerateError> {
        (**self).freeze(start_after_secs)
    }
}
