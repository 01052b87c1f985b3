//! Coin flip between two generators.

use crate::factory::GenerateError;
use crate::{Generated, PayloadGenerator};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use replaygate_types::ControlType;

/// Draws from `primary` with probability `ratio`, otherwise from
/// `secondary`. When one side is exhausted the other takes over.
#[derive(Debug)]
pub struct InterleavedGenerator<A, B> {
    primary: A,
    secondary: B,
    ratio: f64,
    rng: ChaCha8Rng,
    primary_done: bool,
    secondary_done: bool,
}

impl<A: PayloadGenerator, B: PayloadGenerator> InterleavedGenerator<A, B> {
    pub fn new(primary: A, secondary: B, ratio: f64, seed: u64) -> Self {
        Self {
            primary,
            secondary,
            ratio: ratio.clamp(0.0, 1.0),
            rng: ChaCha8Rng::seed_from_u64(seed),
            primary_done: false,
            secondary_done: false,
        }
    }

    pub fn primary(&self) -> &A {
        &self.primary
    }

    pub fn secondary(&self) -> &B {
        &self.secondary
    }

    fn from_primary(&mut self) -> Result<Generated, GenerateError> {
        let generated = self.primary.next_payload()?;
        if generated.is_exhausted() {
            self.primary_done = true;
        }
        Ok(generated)
    }

    fn from_secondary(&mut self) -> Result<Generated, GenerateError> {
        let generated = self.secondary.next_payload()?;
        if generated.is_exhausted() {
            self.secondary_done = true;
        }
        Ok(generated)
    }
}

impl<A: PayloadGenerator, B: PayloadGenerator> PayloadGenerator for InterleavedGenerator<A, B> {
    fn next_payload(&mut self) -> Result<Generated, GenerateError> {
        let pick_primary = match (self.primary_done, self.secondary_done) {
            (true, true) => return Ok(Generated::Exhausted),
            (false, true) => true,
            (true, false) => false,
            (false, false) => self.rng.gen_bool(self.ratio),
        };

        let generated = if pick_primary {
            self.from_primary()?
        } else {
            self.from_secondary()?
        };
        if !generated.is_exhausted() {
            return Ok(generated);
        }

        // The chosen side just ran out; try the other one once.
        match (self.primary_done, self.secondary_done) {
            (true, false) => self.from_secondary(),
            (false, true) => self.from_primary(),
            _ => Ok(Generated::Exhausted),
        }
    }

    fn customized_tps(&self) -> Option<f64> {
        self.primary
            .customized_tps()
            .or_else(|| self.secondary.customized_tps())
    }

    fn control(&self, control: ControlType) -> Result<Vec<u8>, GenerateError> {
        self.primary.control(control)
    }

    fn freeze(&self, start_after_secs: u64) -> Result<Vec<u8>, GenerateError> {
        self.primary.freeze(start_after_secs)
    }
}
