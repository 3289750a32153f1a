//! Brownian trajectories under periodic boundary conditions.
//!
//! Every particle performs a 3D random walk: at each time step a displacement
//! drawn from Normal(0, σ) is added to every coordinate, and the result is
//! folded back into the simulation box. Displacements are drawn sample by
//! sample as `(dx, dy, dz)` from the particle's own RNG stream, and wrapping is
//! applied after every step. The position at sample `k` therefore depends only
//! on `k` and the stream, never on how the samples were split into chunks.

use crate::geometry::{Axis, Particle, SimulationBox};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use shared::algo::parallel::stream_seed;

/// Fold `x` into the half-open interval `[lo, hi)`.
///
/// Values congruent modulo `hi - lo` map to the same result.
pub fn wrap_periodic(x: f64, lo: f64, hi: f64) -> f64 {
    let wrapped = (x - lo).rem_euclid(hi - lo) + lo;
    // rem_euclid can round up to the period for tiny negative offsets
    if wrapped >= hi {
        lo
    } else {
        wrapped
    }
}

/// One Normal(0, σ) displacement.
fn step<R: Rng + ?Sized>(sigma: f64, rng: &mut R) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    sigma * z
}

/// Advance a random walk by `num_samples` steps starting after `start`.
///
/// Returns a `3 × num_samples` array whose column `k` is the wrapped position
/// after step `k + 1`, and updates `start` to the last position.
fn walk<R: Rng + ?Sized>(
    start: &mut [f64; 3],
    sigma: f64,
    num_samples: usize,
    sim_box: &SimulationBox,
    rng: &mut R,
) -> Array2<f64> {
    let bounds = Axis::ALL.map(|a| sim_box.bounds(a));
    let mut positions = Array2::<f64>::zeros((3, num_samples));
    let mut current = *start;

    for k in 0..num_samples {
        for (axis, coord) in current.iter_mut().enumerate() {
            let (lo, hi) = bounds[axis];
            *coord = wrap_periodic(*coord + step(sigma, rng), lo, hi);
            positions[[axis, k]] = *coord;
        }
    }

    *start = current;
    positions
}

/// Generate a wrapped trajectory in one call.
///
/// # Arguments
/// * `start` - Position before the first step, in meters
/// * `sigma` - Standard deviation of each per-axis displacement
/// * `num_samples` - Number of positions to generate
/// * `sim_box` - Box providing the periodic bounds
/// * `rng` - Source of the normally distributed displacements
///
/// # Returns
/// `3 × num_samples` array of positions (rows x, y, z)
pub fn generate_trajectory<R: Rng + ?Sized>(
    start: [f64; 3],
    sigma: f64,
    num_samples: usize,
    sim_box: &SimulationBox,
    rng: &mut R,
) -> Array2<f64> {
    let mut position = start;
    walk(&mut position, sigma, num_samples, sim_box, rng)
}

/// Stateful random walker for one particle, advanced chunk by chunk.
///
/// Carries the last wrapped position and the particle's RNG stream between
/// chunks, so successive calls to [`ParticleWalker::advance`] continue the same
/// trajectory a single [`generate_trajectory`] call would produce.
#[derive(Debug, Clone)]
pub struct ParticleWalker {
    position: [f64; 3],
    sigma: f64,
    rng: StdRng,
    samples_done: usize,
}

impl ParticleWalker {
    /// Walker for particle `index`, with its stream derived from `seed`.
    pub fn new(particle: &Particle, index: usize, sigma: f64, seed: u64) -> Self {
        Self::with_rng(particle, sigma, StdRng::seed_from_u64(stream_seed(seed, index)))
    }

    pub fn with_rng(particle: &Particle, sigma: f64, rng: StdRng) -> Self {
        Self {
            position: particle.r0,
            sigma,
            rng,
            samples_done: 0,
        }
    }

    /// Generate the next `num_samples` positions.
    pub fn advance(&mut self, num_samples: usize, sim_box: &SimulationBox) -> Array2<f64> {
        let block = walk(
            &mut self.position,
            self.sigma,
            num_samples,
            sim_box,
            &mut self.rng,
        );
        self.samples_done += num_samples;
        block
    }

    /// Advance without keeping the positions, e.g. to resume after a restart.
    pub fn skip(&mut self, num_samples: usize, sim_box: &SimulationBox) {
        let bounds = Axis::ALL.map(|a| sim_box.bounds(a));
        for _ in 0..num_samples {
            for (axis, coord) in self.position.iter_mut().enumerate() {
                let (lo, hi) = bounds[axis];
                *coord = wrap_periodic(*coord + step(self.sigma, &mut self.rng), lo, hi);
            }
        }
        self.samples_done += num_samples;
    }

    /// Last wrapped position.
    pub fn position(&self) -> [f64; 3] {
        self.position
    }

    pub fn samples_done(&self) -> usize {
        self.samples_done
    }
}

/// Whether every position of a `3 × n` block lies inside the box.
pub fn within_box(positions: ArrayView2<'_, f64>, sim_box: &SimulationBox) -> bool {
    positions
        .columns()
        .into_iter()
        .all(|c| sim_box.contains([c[0], c[1], c[2]]))
}
