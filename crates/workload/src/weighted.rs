//! Fixed-type and weighted-distribution generation.

use crate::distribution::PayloadDistribution;
use crate::factory::{FactoryConfig, GenerateError, PayloadFactory};
use crate::progress::ProgressTracker;
use crate::{Generated, PayloadGenerator};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use replaygate_types::{ControlType, PayloadType};
use serde::{Deserialize, Serialize};

/// How the payload type is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PayloadMode {
    /// Always the same type and size.
    Fixed {
        #[serde(rename = "type")]
        payload_type: PayloadType,
        size: usize,
    },
    /// Sampled from a distribution on every call.
    Weighted { distribution: PayloadDistribution },
}

/// Generates payloads from a fixed type or a weighted distribution.
#[derive(Debug)]
pub struct WeightedPayloadGenerator {
    factory: PayloadFactory,
    mode: PayloadMode,
    rng: ChaCha8Rng,
    /// Stop after this many payloads.
    limit: Option<u64>,
    generated: u64,
    progress: Option<ProgressTracker>,
}

impl WeightedPayloadGenerator {
    pub fn new(config: FactoryConfig, mode: PayloadMode, seed: u64) -> Self {
        Self {
            factory: PayloadFactory::new(config),
            mode,
            rng: ChaCha8Rng::seed_from_u64(seed),
            limit: None,
            generated: 0,
            progress: None,
        }
    }

    /// Generate at most `limit` payloads, then report exhaustion.
    pub fn with_limit(mut self, limit: u64) -> Self {
        let payload_type = match &self.mode {
            PayloadMode::Fixed { payload_type, .. } => *payload_type,
            // Progress of a mixed run is reported under the first bucket's type.
            PayloadMode::Weighted { distribution } => distribution
                .buckets()
                .first()
                .map(|b| b.payload_type)
                .unwrap_or(PayloadType::Dummy),
        };
        self.progress = Some(ProgressTracker::new(self.factory.node(), payload_type, limit));
        self.limit = Some(limit);
        self
    }

    pub fn generated(&self) -> u64 {
        self.generated
    }

    pub fn factory(&self) -> &PayloadFactory {
        &self.factory
    }
}

impl PayloadGenerator for WeightedPayloadGenerator {
    fn next_payload(&mut self) -> Result<Generated, GenerateError> {
        if self.limit.is_some_and(|limit| self.generated >= limit) {
            return Ok(Generated::Exhausted);
        }

        let (payload_type, size) = match &self.mode {
            PayloadMode::Fixed { payload_type, size } => (*payload_type, *size),
            PayloadMode::Weighted { distribution } => match distribution.sample(&mut self.rng) {
                Some(bucket) => (bucket.payload_type, bucket.size),
                None => return Ok(Generated::NoMatch),
            },
        };

        let payload = self.factory.build(payload_type, size, &mut self.rng)?;
        self.generated += 1;
        if let Some(progress) = self.progress.as_mut() {
            progress.advance();
        }
        Ok(Generated::Payload(payload))
    }

    fn control(&self, control: ControlType) -> Result<Vec<u8>, GenerateError> {
        self.factory.control(control)
    }

    fn freeze(&self, start_after_secs: u64) -> Result<Vec<u8>, GenerateError> {
        self.factory.freeze(start_after_secs)
    }
}
