//! Deterministic pseudo-random stream shared by every participant
//!
//! The generator is mulberry32: a single 32-bit state advanced with
//! wrapping adds, multiplies and xor-shifts. Every operation is fixed-width
//! modular arithmetic, so a JavaScript peer using `Math.imul` or any other
//! implementation reproduces the exact same stream for the same seed.
//! No floating point is involved until the final `u32 -> f64` division,
//! which is exact.

use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u32 = 0x6D2B_79F5;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Seeded mulberry32 stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeededRandom {
    state: u32,
}

impl SeededRandom {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Rebuilds a stream from a previously captured `state()`
    pub fn from_state(state: u32) -> Self {
        Self { state }
    }

    /// Current internal state, enough to resume the stream exactly
    pub fn state(&self) -> u32 {
        self.state
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Uniform value in `[0, 1)`
    pub fn next(&mut self) -> f64 {
        self.next_u32() as f64 / TWO_POW_32
    }

    /// Uniform value in `[lo, hi)`
    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next()
    }
}
