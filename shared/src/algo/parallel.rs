//! Parallel processing utilities with deterministic seeding
//!
//! Work items are processed in parallel, but every item owns a random stream
//! derived from a base seed and its index, so results do not depend on thread
//! scheduling.

use ndarray::{ArrayViewMut1, ArrayViewMut2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// SplitMix64 finalizer, a bijective mixing of all 64 bits.
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derive the seed of stream `index` from a base seed.
///
/// Both inputs are hashed. Seeds derived in two levels, e.g. engine `e` then
/// particle `p`, stay distinct across neighbouring `(e, p)` pairs.
pub fn stream_seed(seed: u64, index: usize) -> u64 {
    splitmix64(splitmix64(seed) ^ index as u64)
}

/// Create one independent RNG per stream, seeded with [`stream_seed`].
pub fn seeded_streams(seed: u64, count: usize) -> Vec<StdRng> {
    (0..count)
        .map(|i| StdRng::seed_from_u64(stream_seed(seed, i)))
        .collect()
}

/// Process the rows of a 2D array in parallel, each row with its own RNG.
///
/// Row `i` is always paired with `rngs[i]`. The RNGs are borrowed mutably so a
/// caller can keep advancing the same streams across successive chunks of a
/// longer sequence.
///
/// # Panics
/// Panics if the number of rows differs from the number of RNGs.
pub fn process_rows_in_parallel<F>(mut array: ArrayViewMut2<'_, f64>, rngs: &mut [StdRng], processor: F)
where
    F: Fn(ArrayViewMut1<'_, f64>, &mut StdRng) + Send + Sync,
{
    assert_eq!(
        array.nrows(),
        rngs.len(),
        "one RNG stream is required per row"
    );

    array
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(rngs.par_iter_mut())
        .for_each(|(row, rng)| processor(row, rng));
}
