//! Emission rates along particle trajectories.

use crate::psf::Psf;
use ndarray::{s, Array1, Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// How emission is accumulated across particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmissionMode {
    /// One trace: the sum over all particles
    #[default]
    Aggregate,
    /// One trace per particle
    PerParticle,
}

impl EmissionMode {
    /// Rows of the emission array for `num_particles` particles.
    pub fn rows(&self, num_particles: usize) -> usize {
        match self {
            EmissionMode::Aggregate => 1,
            EmissionMode::PerParticle => num_particles,
        }
    }
}

/// Emission of one particle along a `3 × n` position block.
///
/// The PSF is evaluated at the radial distance from the optical axis
/// `sqrt(x² + y²)` and the axial position `z`, then squared to combine the
/// excitation and detection profiles.
pub fn particle_emission<P: Psf + ?Sized>(positions: ArrayView2<'_, f64>, psf: &P) -> Array1<f64> {
    let x = positions.row(0);
    let y = positions.row(1);
    let z = positions.row(2);
    let radial = Zip::from(&x).and(&y).map_collect(|&x, &y| x.hypot(y));
    let mut em = psf.eval_xz_array(radial.view(), z);
    em.mapv_inplace(|v| v * v);
    em
}

/// Emission of the current chunk, accumulated particle by particle.
#[derive(Debug, Clone, PartialEq)]
pub enum EmissionBuffer {
    Aggregate(Array1<f64>),
    PerParticle(Array2<f64>),
}

impl EmissionBuffer {
    /// Zeroed buffer for a chunk of `chunk_len` samples.
    pub fn new(mode: EmissionMode, num_particles: usize, chunk_len: usize) -> Self {
        match mode {
            EmissionMode::Aggregate => EmissionBuffer::Aggregate(Array1::zeros(chunk_len)),
            EmissionMode::PerParticle => {
                EmissionBuffer::PerParticle(Array2::zeros((num_particles, chunk_len)))
            }
        }
    }

    /// Add the emission of particle `index` for this chunk.
    ///
    /// # Panics
    /// Panics if `emission` does not match the chunk length.
    pub fn accumulate(&mut self, index: usize, emission: &Array1<f64>) {
        match self {
            EmissionBuffer::Aggregate(total) => *total += emission,
            EmissionBuffer::PerParticle(rows) => rows.row_mut(index).assign(emission),
        }
    }

    /// Number of samples in the chunk.
    pub fn len(&self) -> usize {
        match self {
            EmissionBuffer::Aggregate(total) => total.len(),
            EmissionBuffer::PerParticle(rows) => rows.ncols(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer as a `rows × len` array, ready to append to storage.
    pub fn into_rows(self) -> Array2<f64> {
        match self {
            EmissionBuffer::Aggregate(total) => total.insert_axis(Axis(0)),
            EmissionBuffer::PerParticle(rows) => rows,
        }
    }
}

/// Sum the rows of a per-particle emission block into one trace.
pub fn sum_rows(rows: ArrayView2<'_, f64>) -> Array1<f64> {
    if rows.nrows() == 1 {
        return rows.slice(s![0, ..]).to_owned();
    }
    rows.sum_axis(Axis(0))
}
