//! Poisson photon sampling from emission rates.

use crate::errors::{Result, SimulationError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::noise::{sample_poisson_counts, sample_poisson_rows};

/// Scaling from normalized emission to detected photon rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotonConfig {
    /// Photon rate (counts/s) of a particle at the PSF peak
    pub max_em_rate: f64,
    /// Constant background rate (counts/s)
    pub bg_rate: f64,
}

impl Default for PhotonConfig {
    fn default() -> Self {
        Self {
            max_em_rate: 1.0,
            bg_rate: 0.0,
        }
    }
}

impl PhotonConfig {
    pub fn new(max_em_rate: f64, bg_rate: f64) -> Result<Self> {
        let cfg = Self {
            max_em_rate,
            bg_rate,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("max_em_rate", self.max_em_rate), ("bg_rate", self.bg_rate)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimulationError::Configuration(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Expected photons per bin: `(emission · max_em_rate + bg_rate) · t_step`.
    pub fn expected_counts(&self, emission: ArrayView1<'_, f64>, t_step: f64) -> Array1<f64> {
        emission.mapv(|em| (em * self.max_em_rate + self.bg_rate) * t_step)
    }

    fn expected_counts_rows(&self, emission: ArrayView2<'_, f64>, t_step: f64) -> Array2<f64> {
        emission.mapv(|em| (em * self.max_em_rate + self.bg_rate) * t_step)
    }
}

/// Draw one photon count per bin of an emission chunk.
///
/// The RNG is consumed in bin order, so successive chunks drawn from the same
/// stream reproduce a single whole-trace draw.
pub fn sample_timetrace<R: Rng + ?Sized>(
    emission: ArrayView1<'_, f64>,
    config: &PhotonConfig,
    t_step: f64,
    rng: &mut R,
) -> Result<Array1<u8>> {
    let lambda = config.expected_counts(emission, t_step);
    Ok(sample_poisson_counts(lambda.view(), rng)?)
}

/// Draw photon counts for every particle row of an emission chunk.
///
/// Row `i` uses `rngs[i]`; the background rate is added to every row.
pub fn sample_timetrace_rows(
    emission: ArrayView2<'_, f64>,
    config: &PhotonConfig,
    t_step: f64,
    rngs: &mut [StdRng],
) -> Result<Array2<u8>> {
    if emission.nrows() != rngs.len() {
        return Err(SimulationError::ParameterMismatch(format!(
            "{} emission rows but {} photon streams",
            emission.nrows(),
            rngs.len()
        )));
    }
    let lambda = config.expected_counts_rows(emission, t_step);
    Ok(sample_poisson_rows(lambda.view(), rngs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use shared::algo::parallel::seeded_streams;

    #[test]
    fn test_expected_counts() {
        let cfg = PhotonConfig::new(2e5, 1e3).unwrap();
        let lambda = cfg.expected_counts(array![0.0, 0.5, 1.0].view(), 1e-6);
        assert_relative_eq!(lambda[0], 1e-3, max_relative = 1e-12);
        assert_relative_eq!(lambda[1], 0.101, max_relative = 1e-12);
        assert_relative_eq!(lambda[2], 0.201, max_relative = 1e-12);
    }

    #[test]
    fn test_rejects_negative_rates() {
        assert!(PhotonConfig::new(-1.0, 0.0).is_err());
        assert!(PhotonConfig::new(1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_negative_emission_is_configuration_error() {
        let cfg = PhotonConfig::default();
        let mut rng = StdRng::seed_from_u64(0);
        let result = sample_timetrace(array![-1.0].view(), &cfg, 1.0, &mut rng);
        assert!(matches!(result, Err(SimulationError::Configuration(_))));
    }

    #[test]
    fn test_poisson_mean_recovery() {
        let cfg = PhotonConfig::new(1.0, 0.0).unwrap();
        let emission = Array1::from_elem(100_000, 1.5);
        let mut rng = StdRng::seed_from_u64(42);
        let counts = sample_timetrace(emission.view(), &cfg, 1.0, &mut rng).unwrap();
        let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / counts.len() as f64;
        assert_relative_eq!(mean, 1.5, epsilon = 0.02);
    }

    #[test]
    fn test_rows_need_one_stream_per_row() {
        let cfg = PhotonConfig::default();
        let mut rngs = seeded_streams(0, 1);
        let result = sample_timetrace_rows(Array2::zeros((2, 3)).view(), &cfg, 1.0, &mut rngs);
        assert!(matches!(result, Err(SimulationError::ParameterMismatch(_))));
    }

    #[test]
    fn test_rows_with_background_only() {
        let cfg = PhotonConfig::new(0.0, 0.5).unwrap();
        let mut rngs = seeded_streams(8, 3);
        let counts =
            sample_timetrace_rows(Array2::zeros((3, 50_000)).view(), &cfg, 1.0, &mut rngs).unwrap();
        for row in counts.rows() {
            let mean = row.iter().map(|&c| c as f64).sum::<f64>() / row.len() as f64;
            assert_relative_eq!(mean, 0.5, epsilon = 0.02);
        }
    }
}
