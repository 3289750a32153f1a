//! Numerical helpers used by the PSF models.

pub mod bilinear;

pub use bilinear::{BilinearInterpolator, InterpolationError};
