//! Bilinear interpolation on rectilinear 2D grids.

use ndarray::Array2;
use thiserror::Error;

/// Error types for bilinear interpolation setup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpolationError {
    #[error("data dimensions ({data_shape:?}) don't match coordinate lengths (x: {x_len}, y: {y_len})")]
    DimensionMismatch {
        x_len: usize,
        y_len: usize,
        data_shape: (usize, usize),
    },
    #[error("{axis} coordinates must be strictly ascending")]
    Unsorted { axis: &'static str },
    #[error("{axis} axis needs at least two grid points")]
    TooFewPoints { axis: &'static str },
}

/// Bilinear interpolator over a grid with sorted, possibly irregular axes.
///
/// Data is indexed as `[y_index, x_index]`. Points outside the grid evaluate
/// to `None`; callers decide what an out-of-grid sample means.
#[derive(Debug, Clone)]
pub struct BilinearInterpolator {
    x_coords: Vec<f64>,
    y_coords: Vec<f64>,
    data: Array2<f64>,
}

impl BilinearInterpolator {
    /// Create a new interpolator.
    ///
    /// # Arguments
    /// * `x_coords` - X-axis coordinates, strictly ascending
    /// * `y_coords` - Y-axis coordinates, strictly ascending
    /// * `data` - 2D data with shape `(y_coords.len(), x_coords.len())`
    pub fn new(
        x_coords: Vec<f64>,
        y_coords: Vec<f64>,
        data: Array2<f64>,
    ) -> Result<Self, InterpolationError> {
        let (ny, nx) = data.dim();
        if nx != x_coords.len() || ny != y_coords.len() {
            return Err(InterpolationError::DimensionMismatch {
                x_len: x_coords.len(),
                y_len: y_coords.len(),
                data_shape: (ny, nx),
            });
        }
        for (axis, coords) in [("X", &x_coords), ("Y", &y_coords)] {
            if coords.len() < 2 {
                return Err(InterpolationError::TooFewPoints { axis });
            }
            if coords.windows(2).any(|w| w[1] <= w[0]) {
                return Err(InterpolationError::Unsorted { axis });
            }
        }

        Ok(Self {
            x_coords,
            y_coords,
            data,
        })
    }

    /// Domain covered by the grid as `((x_min, x_max), (y_min, y_max))`.
    pub fn domain(&self) -> ((f64, f64), (f64, f64)) {
        let span = |c: &[f64]| (c[0], c[c.len() - 1]);
        (span(&self.x_coords), span(&self.y_coords))
    }

    /// Lower index and fractional weight of `value` on a sorted axis.
    fn locate(coords: &[f64], value: f64) -> Option<(usize, f64)> {
        let n = coords.len();
        if !(value >= coords[0] && value <= coords[n - 1]) {
            return None;
        }
        // First index whose coordinate exceeds value, clamped to the last cell
        let upper = coords.partition_point(|&c| c <= value).clamp(1, n - 1);
        let lower = upper - 1;
        let weight = (value - coords[lower]) / (coords[upper] - coords[lower]);
        Some((lower, weight))
    }

    /// Interpolate at `(x, y)`, `None` outside the grid.
    pub fn interpolate(&self, x: f64, y: f64) -> Option<f64> {
        let (ix, wx) = Self::locate(&self.x_coords, x)?;
        let (iy, wy) = Self::locate(&self.y_coords, y)?;

        let q11 = self.data[[iy, ix]];
        let q21 = self.data[[iy, ix + 1]];
        let q12 = self.data[[iy + 1, ix]];
        let q22 = self.data[[iy + 1, ix + 1]];

        Some(
            q11 * (1.0 - wx) * (1.0 - wy)
                + q21 * wx * (1.0 - wy)
                + q12 * (1.0 - wx) * wy
                + q22 * wx * wy,
        )
    }
}
