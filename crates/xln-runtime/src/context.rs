use rand::rngs::StdRng;
use rand::SeedableRng;

use xln_core::types::Timestamp;

/// Explicit runtime-wide context threaded through ticks. There is no other
/// ambient state: the clock is injected at construction and every piece of
/// randomness flows from the seeded PRNG.
pub struct RuntimeContext {
    /// Timestamp of the tick currently executing.
    pub now: Timestamp,
    /// Deterministic PRNG; identical seeds give identical runs.
    pub rng: StdRng,
}

impl RuntimeContext {
    pub fn new(seed: u64) -> Self {
        Self {
            now: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}
