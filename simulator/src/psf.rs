//! Point spread function models for the confocal detection volume.
//!
//! The simulation only needs one capability from a PSF: the detection-weighted
//! intensity at a radial distance from the optical axis and an axial position
//! along it. Models implement [`Psf`]; the emission stage squares the returned
//! value to combine the excitation and detection profiles.
//!
//! # Models
//! - [`GaussianPsf`]: separable 3D Gaussian, analytical
//! - [`TabulatedPsf`]: numerically computed profile sampled on a radial × axial grid
//! - [`ConstantPsf`]: uniform illumination, mostly for tests and calibration

use crate::algo::bilinear::BilinearInterpolator;
use crate::errors::{Result, SimulationError};
use ndarray::{Array1, Array2, ArrayView1, Zip};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Detection-weighted intensity profile of the optical system.
///
/// Implementations must be pure and deterministic. Inputs are finite.
pub trait Psf: Send + Sync {
    /// Short model name used in logs and run records.
    fn name(&self) -> &str;

    /// Intensity at radial distance `radial` and axial position `axial`, in meters.
    fn eval_xz(&self, radial: f64, axial: f64) -> f64;

    /// Vectorized [`Psf::eval_xz`] over matching radial and axial arrays.
    fn eval_xz_array(&self, radial: ArrayView1<'_, f64>, axial: ArrayView1<'_, f64>) -> Array1<f64> {
        Zip::from(&radial)
            .and(&axial)
            .map_collect(|&r, &z| self.eval_xz(r, z))
    }
}

impl<P: Psf + ?Sized> Psf for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn eval_xz(&self, radial: f64, axial: f64) -> f64 {
        (**self).eval_xz(radial, axial)
    }

    fn eval_xz_array(&self, radial: ArrayView1<'_, f64>, axial: ArrayView1<'_, f64>) -> Array1<f64> {
        (**self).eval_xz_array(radial, axial)
    }
}

/// Gaussian PSF with independent radial and axial widths.
///
/// ```text
/// I(r, z) = exp(-r² / 2σr² - (z - zc)² / 2σz²)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianPsf {
    /// Radial standard deviation in meters
    pub sigma_radial: f64,
    /// Axial standard deviation in meters
    pub sigma_axial: f64,
    /// Axial position of the focus in meters
    pub center_axial: f64,
}

impl GaussianPsf {
    pub fn new(sigma_radial: f64, sigma_axial: f64) -> Result<Self> {
        if !(sigma_radial > 0.0 && sigma_axial > 0.0)
            || !sigma_radial.is_finite()
            || !sigma_axial.is_finite()
        {
            return Err(SimulationError::Configuration(format!(
                "Gaussian PSF widths must be positive and finite, got ({sigma_radial}, {sigma_axial})"
            )));
        }
        Ok(Self {
            sigma_radial,
            sigma_axial,
            center_axial: 0.0,
        })
    }

    /// Move the focus along the optical axis.
    pub fn with_center(mut self, center_axial: f64) -> Self {
        self.center_axial = center_axial;
        self
    }
}

impl Psf for GaussianPsf {
    fn name(&self) -> &str {
        "gauss"
    }

    fn eval_xz(&self, radial: f64, axial: f64) -> f64 {
        let dz = axial - self.center_axial;
        (-(radial * radial) / (2.0 * self.sigma_radial * self.sigma_radial)
            - (dz * dz) / (2.0 * self.sigma_axial * self.sigma_axial))
            .exp()
    }
}

/// Uniform PSF returning the same intensity everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantPsf(pub f64);

impl Psf for ConstantPsf {
    fn name(&self) -> &str {
        "constant"
    }

    fn eval_xz(&self, _radial: f64, _axial: f64) -> f64 {
        self.0
    }
}

/// On-disk form of a tabulated PSF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabulatedPsfData {
    /// Radial grid in meters, ascending from zero
    pub radial: Vec<f64>,
    /// Axial grid in meters, ascending from zero (profile is mirrored for z < 0)
    pub axial: Vec<f64>,
    /// Intensities indexed as `values[axial_index][radial_index]`
    pub values: Vec<Vec<f64>>,
}

/// Numerically computed PSF sampled on a radial × axial grid.
///
/// The profile is assumed symmetric about the focal plane, so only `z ≥ 0` is
/// tabulated. Intensities between grid points are bilinearly interpolated and
/// positions beyond the grid see zero intensity.
#[derive(Debug, Clone)]
pub struct TabulatedPsf {
    grid: BilinearInterpolator,
}

impl TabulatedPsf {
    pub fn new(radial: Vec<f64>, axial: Vec<f64>, values: Array2<f64>) -> Result<Self> {
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(SimulationError::Configuration(
                "tabulated PSF values must be finite and non-negative".to_string(),
            ));
        }
        let grid = BilinearInterpolator::new(radial, axial, values)
            .map_err(|e| SimulationError::Configuration(format!("tabulated PSF grid: {e}")))?;
        Ok(Self { grid })
    }

    pub fn from_data(data: TabulatedPsfData) -> Result<Self> {
        let rows = data.values.len();
        let cols = data.values.first().map_or(0, Vec::len);
        if data.values.iter().any(|row| row.len() != cols) {
            return Err(SimulationError::Configuration(
                "tabulated PSF rows have different lengths".to_string(),
            ));
        }
        let flat: Vec<f64> = data.values.into_iter().flatten().collect();
        let values = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| SimulationError::Configuration(format!("tabulated PSF shape: {e}")))?;
        Self::new(data.radial, data.axial, values)
    }

    /// Load a tabulated PSF from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SimulationError::Configuration(format!("cannot read PSF {}: {e}", path.display()))
        })?;
        let data: TabulatedPsfData = serde_json::from_str(&json).map_err(|e| {
            SimulationError::Configuration(format!("cannot parse PSF {}: {e}", path.display()))
        })?;
        Self::from_data(data)
    }

    /// Tabulate any PSF on the given grid.
    pub fn sample<P: Psf + ?Sized>(psf: &P, radial: Vec<f64>, axial: Vec<f64>) -> Result<Self> {
        let values =
            Array2::from_shape_fn((axial.len(), radial.len()), |(j, i)| psf.eval_xz(radial[i], axial[j]));
        Self::new(radial, axial, values)
    }
}

impl Psf for TabulatedPsf {
    fn name(&self) -> &str {
        "numeric"
    }

    fn eval_xz(&self, radial: f64, axial: f64) -> f64 {
        self.grid.interpolate(radial.abs(), axial.abs()).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_gaussian_peak_and_width() {
        let psf = GaussianPsf::new(0.2e-6, 0.6e-6).unwrap();
        assert_relative_eq!(psf.eval_xz(0.0, 0.0), 1.0);
        assert_relative_eq!(psf.eval_xz(0.2e-6, 0.0), (-0.5f64).exp(), max_relative = 1e-12);
        assert_relative_eq!(psf.eval_xz(0.0, -0.6e-6), (-0.5f64).exp(), max_relative = 1e-12);
    }

    #[test]
    fn test_gaussian_center_shift() {
        let psf = GaussianPsf::new(1e-7, 3e-7).unwrap().with_center(1e-7);
        assert_relative_eq!(psf.eval_xz(0.0, 1e-7), 1.0);
        assert!(psf.eval_xz(0.0, 0.0) < 1.0);
    }

    #[test]
    fn test_gaussian_rejects_bad_widths() {
        assert!(GaussianPsf::new(0.0, 1e-6).is_err());
        assert!(GaussianPsf::new(1e-6, f64::INFINITY).is_err());
    }

    #[test]
    fn test_vectorized_matches_scalar() {
        let psf = GaussianPsf::new(0.2e-6, 0.6e-6).unwrap();
        let r = array![0.0, 1e-7, 3e-7];
        let z = array![0.0, -2e-7, 5e-7];
        let out = psf.eval_xz_array(r.view(), z.view());
        for i in 0..3 {
            assert_eq!(out[i], psf.eval_xz(r[i], z[i]));
        }
    }

    #[test]
    fn test_tabulated_matches_source_on_grid() {
        let gauss = GaussianPsf::new(0.2e-6, 0.6e-6).unwrap();
        let radial: Vec<f64> = (0..41).map(|i| i as f64 * 0.025e-6).collect();
        let axial: Vec<f64> = (0..61).map(|i| i as f64 * 0.05e-6).collect();
        let psf = TabulatedPsf::sample(&gauss, radial, axial).unwrap();

        assert_relative_eq!(psf.eval_xz(0.1e-6, 0.5e-6), gauss.eval_xz(0.1e-6, 0.5e-6), max_relative = 1e-9);
        assert_relative_eq!(psf.eval_xz(0.1e-6, -0.5e-6), psf.eval_xz(0.1e-6, 0.5e-6));
        // Between grid points the interpolation stays close to the analytical profile
        assert_relative_eq!(psf.eval_xz(0.11e-6, 0.52e-6), gauss.eval_xz(0.11e-6, 0.52e-6), epsilon = 1e-2);
    }

    #[test]
    fn test_tabulated_zero_outside_grid() {
        let psf = TabulatedPsf::new(vec![0.0, 1e-6], vec![0.0, 1e-6], Array2::ones((2, 2))).unwrap();
        assert_eq!(psf.eval_xz(2e-6, 0.0), 0.0);
        assert_eq!(psf.eval_xz(0.0, -2e-6), 0.0);
        assert_eq!(psf.eval_xz(0.5e-6, -0.5e-6), 1.0);
    }

    #[test]
    fn test_tabulated_from_json() {
        let json = r#"{"radial":[0.0,1e-6],"axial":[0.0,2e-6],"values":[[1.0,0.5],[0.5,0.0]]}"#;
        let data: TabulatedPsfData = serde_json::from_str(json).unwrap();
        let psf = TabulatedPsf::from_data(data).unwrap();
        assert_relative_eq!(psf.eval_xz(0.5e-6, 0.0), 0.75);
        assert_relative_eq!(psf.eval_xz(0.5e-6, 1e-6), 0.5);
    }

    #[test]
    fn test_tabulated_rejects_ragged_rows() {
        let data = TabulatedPsfData {
            radial: vec![0.0, 1.0],
            axial: vec![0.0, 1.0],
            values: vec![vec![1.0, 0.5], vec![0.5]],
        };
        assert!(matches!(
            TabulatedPsf::from_data(data),
            Err(SimulationError::Configuration(_))
        ));
    }
}
