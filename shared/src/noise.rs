//! Poisson counting noise for photon arrival statistics.
//!
//! Turns expected photon numbers per time bin into integer photon counts.
//! Each bin is an independent Poisson draw whose mean is the expected count of
//! that bin. Bins with a zero mean never consume random numbers and always
//! yield zero photons.
//!
//! Draws are made in bin order from the supplied RNG, so feeding consecutive
//! chunks of a trace through the same RNG gives the same counts as feeding the
//! whole trace at once.

use crate::algo::parallel::process_rows_in_parallel;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NoiseError {
    #[error("expected photon count {value} at bin {index} is negative or not finite")]
    InvalidMean { index: usize, value: f64 },
    #[error("sampled {count} photons at bin {index}, more than a u8 count can hold")]
    CountOverflow { index: usize, count: f64 },
}

/// Reject means that cannot parameterize a Poisson draw.
pub fn validate_means(means: ArrayView1<'_, f64>) -> Result<(), NoiseError> {
    match means
        .iter()
        .enumerate()
        .find(|(_, m)| !m.is_finite() || **m < 0.0)
    {
        Some((index, &value)) => Err(NoiseError::InvalidMean { index, value }),
        None => Ok(()),
    }
}

/// Draw one Poisson count with the given mean.
///
/// Zero mean means zero photons; the RNG is left untouched in that case.
/// Callers validate the mean first.
fn poisson_draw<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> f64 {
    if mean > 0.0 {
        Poisson::new(mean).map_or(0.0, |poisson| poisson.sample(rng))
    } else {
        0.0
    }
}

/// Sample one Poisson count per bin.
///
/// # Arguments
/// * `means` - Expected photon count of every bin
/// * `rng` - Random stream consumed in bin order
///
/// # Returns
/// Per-bin counts, or an error if a mean is invalid or a count exceeds `u8::MAX`
pub fn sample_poisson_counts<R: Rng + ?Sized>(
    means: ArrayView1<'_, f64>,
    rng: &mut R,
) -> Result<Array1<u8>, NoiseError> {
    validate_means(means)?;

    let mut counts = Array1::<u8>::zeros(means.len());
    for (index, (&mean, count)) in means.iter().zip(counts.iter_mut()).enumerate() {
        let drawn = poisson_draw(mean, rng);
        *count = to_count(index, drawn)?;
    }
    Ok(counts)
}

/// Sample Poisson counts for every row of a 2D array of means in parallel.
///
/// Row `i` draws from `rngs[i]`; the streams persist in the caller so later
/// chunks continue where this one stopped.
pub fn sample_poisson_rows(
    means: ArrayView2<'_, f64>,
    rngs: &mut [StdRng],
) -> Result<Array2<u8>, NoiseError> {
    for row in means.rows() {
        validate_means(row)?;
    }

    let mut drawn = means.to_owned();
    apply_poisson_in_place(drawn.view_mut(), rngs);

    let mut counts = Array2::<u8>::zeros(drawn.dim());
    let ncols = drawn.ncols();
    for ((pos, &value), count) in drawn.indexed_iter().zip(counts.iter_mut()) {
        *count = to_count(pos.0 * ncols + pos.1, value)?;
    }
    Ok(counts)
}

/// Replace each mean with a Poisson draw, processing rows in parallel.
fn apply_poisson_in_place(means: ArrayViewMut2<'_, f64>, rngs: &mut [StdRng]) {
    process_rows_in_parallel(means, rngs, |mut row, rng| {
        row.iter_mut()
            .for_each(|value| *value = poisson_draw(*value, rng));
    });
}

fn to_count(index: usize, drawn: f64) -> Result<u8, NoiseError> {
    if drawn > u8::MAX as f64 {
        return Err(NoiseError::CountOverflow {
            index,
            count: drawn,
        });
    }
    Ok(drawn as u8)
}
