//! Coherent gradient noise used for terrain elevation
//!
//! The permutation table is drawn from a room's [`SeededRandom`], so two
//! rooms with different seeds get different terrain while every member of a
//! room samples the same function.

use crate::random::SeededRandom;

const LOW_FREQUENCY: f64 = 0.012;
const LOW_AMPLITUDE: f64 = 30.0;
const HIGH_FREQUENCY: f64 = 0.04;
const HIGH_AMPLITUDE: f64 = 6.0;

/// Immutable 2D noise function built from a 256-entry permutation table
#[derive(Clone)]
pub struct NoiseField {
    perm: [u8; 512],
}

impl NoiseField {
    /// Draws 256 permutation entries from `rng`, advancing it by 256 values
    pub fn from_random(rng: &mut SeededRandom) -> Self {
        let mut base = [0u8; 256];
        for slot in base.iter_mut() {
            *slot = (rng.next() * 256.0) as u8;
        }

        let mut perm = [0u8; 512];
        for (i, slot) in perm.iter_mut().enumerate() {
            *slot = base[i & 255];
        }

        Self { perm }
    }

    /// Terrain height at world position `(x, z)`, low plus high frequency detail
    pub fn elevation(&self, x: f64, z: f64) -> f64 {
        self.sample(x * LOW_FREQUENCY, z * LOW_FREQUENCY) * LOW_AMPLITUDE
            + self.sample(x * HIGH_FREQUENCY, z * HIGH_FREQUENCY) * HIGH_AMPLITUDE
    }

    /// Raw noise in roughly `[-1, 1]`, zero on integer lattice points
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let x_floor = x.floor();
        let y_floor = y.floor();
        let xi = (x_floor as i64 & 255) as usize;
        let yi = (y_floor as i64 & 255) as usize;

        let x = x - x_floor;
        let y = y - y_floor;
        let u = fade(x);
        let v = fade(y);

        let a = self.perm[xi] as usize + yi;
        let b = self.perm[xi + 1] as usize + yi;

        lerp(
            v,
            lerp(
                u,
                grad(self.perm[a], x, y, 0.0),
                grad(self.perm[b], x - 1.0, y, 0.0),
            ),
            lerp(
                u,
                grad(self.perm[a + 1], x, y - 1.0, 0.0),
                grad(self.perm[b + 1], x - 1.0, y - 1.0, 0.0),
            ),
        )
    }
}

impl std::fmt::Debug for NoiseField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseField")
            .field("perm_head", &&self.perm[..8])
            .finish()
    }
}

/// Quintic smoothstep `6t^5 - 15t^4 + 10t^3`
fn fade(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn lerp(t: f64, a: f64, b: f64) -> f64 {
    a + t * (b - a)
}

fn grad(hash: u8, x: f64, y: f64, z: f64) -> f64 {
    let h = hash & 15;
    let u = if h < 8 { x } else { y };
    let v = if h < 4 {
        y
    } else if h == 12 || h == 14 {
        x
    } else {
        z
    };
    let u = if h & 1 == 0 { u } else { -u };
    let v = if h & 2 == 0 { v } else { -v };
    u + v
}
