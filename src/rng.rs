//! Seeded, reproducible random index generation.
//!
//! Centroid initialization is the only consumer. ChaCha8 gives an identical
//! stream for an identical seed on every platform, which the quantizer's
//! bitwise-reproducibility contract depends on. Never used for security.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub struct SeededRng {
    inner: ChaCha8Rng,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draw a uniform index in `[0, upper_bound)`.
    ///
    /// # Panics
    /// Panics if `upper_bound` is zero; callers guard against empty input.
    pub fn next_index(&mut self, upper_bound: usize) -> usize {
        self.inner.gen_range(0..upper_bound)
    }
}
