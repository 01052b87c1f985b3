//! Tree leaf generation.

use crate::factory::{FactoryConfig, GenerateError, PayloadFactory};
use crate::{Generated, PayloadGenerator};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use replaygate_types::{ControlType, PayloadType};
use serde::{Deserialize, Serialize};

/// Share of tree payloads that create a new leaf rather than update one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeMix {
    pub create_ratio: f64,
    pub size: usize,
    /// Stop after this many leaves have been written.
    pub total: Option<u64>,
}

impl Default for TreeMix {
    fn default() -> Self {
        Self {
            create_ratio: 0.5,
            size: 100,
            total: None,
        }
    }
}

/// Generates tree leaf creates and updates.
#[derive(Debug)]
pub struct TreePayloadGenerator {
    factory: PayloadFactory,
    mix: TreeMix,
    rng: ChaCha8Rng,
    generated: u64,
}

impl TreePayloadGenerator {
    pub fn new(config: FactoryConfig, mix: TreeMix, seed: u64) -> Self {
        Self {
            factory: PayloadFactory::new(config),
            mix,
            rng: ChaCha8Rng::seed_from_u64(seed),
            generated: 0,
        }
    }

    /// Leaves this generator has created.
    pub fn leaves(&self) -> usize {
        self.factory.tree_len()
    }
}

impl PayloadGenerator for TreePayloadGenerator {
    fn next_payload(&mut self) -> Result<Generated, GenerateError> {
        if self.mix.total.is_some_and(|total| self.generated >= total) {
            return Ok(Generated::Exhausted);
        }
        let create = self.factory.tree_len() == 0
            || self.rng.gen_bool(self.mix.create_ratio.clamp(0.0, 1.0));
        let payload_type = if create {
            PayloadType::TreeCreate
        } else {
            PayloadType::TreeUpdate
        };
        let payload = self.factory.build(payload_type, self.mix.size, &mut self.rng)?;
        self.generated += 1;
        Ok(Generated::Payload(payload))
    }

    fn control(&self, control: ControlType) -> Result<Vec<u8>, GenerateError> {
        self.factory.control(control)
    }

    fn freeze(&self, start_after_secs: u64) -> Result<Vec<u8>, GenerateError> {
        self.factory.freeze(start_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaygate_types::NodeId;

    fn generator(create_ratio: f64, total: Option<u64>) -> TreePayloadGenerator {
        TreePayloadGenerator::new(
            FactoryConfig::new(NodeId(3)).with_signing(false),
            TreeMix {
                create_ratio,
                size: 0,
                total,
            },
            42,
        )
    }

    #[test]
    fn test_first_payload_is_create() {
        let mut g = generator(0.0, None);
        let first = g.next_payload().unwrap().into_payload().unwrap();
        assert_eq!(first.payload_type, PayloadType::TreeCreate);

        for _ in 0..10 {
            let next = g.next_payload().unwrap().into_payload().unwrap();
            assert_eq!(next.payload_type, PayloadType::TreeUpdate, "ratio 0 only updates");
        }
        assert_eq!(g.leaves(), 1);
    }

    #[test]
    fn test_total_exhausts() {
        let mut g = generator(1.0, Some(4));
        for _ in 0..4 {
            assert!(g.next_payload().unwrap().into_payload().is_some());
        }
        assert!(g.next_payload().unwrap().is_exhausted());
        assert_eq!(g.leaves(), 4);
    }

    #[test]
    fn test_mixed_ratio_produces_both() {
        let mut g = generator(0.5, Some(100));
        let mut creates = 0;
        let mut updates = 0;
        while let Some(p) = g.next_payload().unwrap().into_payload() {
            match p.payload_type {
                PayloadType::TreeCreate => creates += 1,
                PayloadType::TreeUpdate => updates += 1,
                other => panic!("unexpected {other}"),
            }
        }
        assert!(creates > 20 && updates > 20, "{creates} creates, {updates} updates");
    }
}
