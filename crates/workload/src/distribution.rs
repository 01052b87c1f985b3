//! Weighted (type, size) distribution.
//!
//! Weights are percentages. A draw `r` in `[0, 100)` selects bucket `i`
//! when `sum(w[..i]) <= r < sum(w[..=i])`. Weights summing to less than 100
//! leave a gap at the top; a draw in the gap selects nothing.

use rand::Rng;
use replaygate_types::PayloadType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound (exclusive) of a draw.
pub const DRAW_RANGE: u32 = 100;

/// One payload type with its padded size and weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionBucket {
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
    /// Target encoded size in bytes.
    pub size: usize,
    /// Percentage weight.
    pub weight: u32,
}

impl DistributionBucket {
    pub fn new(payload_type: PayloadType, size: usize, weight: u32) -> Self {
        Self {
            payload_type,
            size,
            weight,
        }
    }
}

/// Errors in a distribution definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("distribution has no buckets")]
    Empty,

    #[error("distribution weights sum to {0}, more than 100")]
    WeightOverflow(u32),

    #[error("{0} cannot be generated from a distribution")]
    UnsupportedType(PayloadType),
}

/// A cumulative-weight distribution over payload buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PayloadDistribution {
    buckets: Vec<DistributionBucket>,
}

impl PayloadDistribution {
    /// Build and validate a distribution.
    pub fn new(buckets: Vec<DistributionBucket>) -> Result<Self, DistributionError> {
        let distribution = Self { buckets };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Check the weights and types.
    pub fn validate(&self) -> Result<(), DistributionError> {
        if self.buckets.is_empty() {
            return Err(DistributionError::Empty);
        }
        let total = self.total_weight();
        if total > DRAW_RANGE {
            return Err(DistributionError::WeightOverflow(total));
        }
        if let Some(bucket) = self
            .buckets
            .iter()
            .find(|b| !is_generatable(b.payload_type))
        {
            return Err(DistributionError::UnsupportedType(bucket.payload_type));
        }
        Ok(())
    }

    /// Sum of all weights, saturating.
    pub fn total_weight(&self) -> u32 {
        self.buckets
            .iter()
            .fold(0u32, |acc, b| acc.saturating_add(b.weight))
    }

    pub fn buckets(&self) -> &[DistributionBucket] {
        &self.buckets
    }

    /// Bucket selected by the draw `r`, or `None` if `r` falls past the
    /// last bucket.
    pub fn select(&self, r: u32) -> Option<&DistributionBucket> {
        let mut sum = 0u32;
        for bucket in &self.buckets {
            if r >= sum && r < sum.saturating_add(bucket.weight) {
                return Some(bucket);
            }
            sum = sum.saturating_add(bucket.weight);
        }
        None
    }

    /// Draw `r` from `rng` and select.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&DistributionBucket> {
        self.select(rng.gen_range(0..DRAW_RANGE))
    }
}

/// Control and freeze transactions are issued by the orchestrator, never
/// sampled.
pub(crate) fn is_generatable(payload_type: PayloadType) -> bool {
    !matches!(payload_type, PayloadType::Control | PayloadType::Freeze)
}
