//! Simulation domain and particle initial state.

use crate::errors::{Result, SimulationError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Avogadro constant in mol⁻¹
pub const AVOGADRO: f64 = 6.022141e23;

/// Spatial axis of the simulation box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

/// Axis-aligned simulation box with periodic boundaries.
///
/// Bounds are in meters. Construction checks that every extent is positive and
/// finite; the box is immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoxBounds", into = "BoxBounds")]
pub struct SimulationBox {
    bounds: [[f64; 2]; 3],
}

/// Serialized form of [`SimulationBox`], validated on load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoxBounds {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
    pub z1: f64,
    pub z2: f64,
}

impl TryFrom<BoxBounds> for SimulationBox {
    type Error = SimulationError;

    fn try_from(b: BoxBounds) -> Result<Self> {
        SimulationBox::new(b.x1, b.x2, b.y1, b.y2, b.z1, b.z2)
    }
}

impl From<SimulationBox> for BoxBounds {
    fn from(b: SimulationBox) -> Self {
        let [[x1, x2], [y1, y2], [z1, z2]] = b.bounds;
        BoxBounds {
            x1,
            x2,
            y1,
            y2,
            z1,
            z2,
        }
    }
}

impl SimulationBox {
    /// Create a box from its six bounds.
    ///
    /// Fails with a configuration error if any upper bound is not strictly
    /// greater than the lower bound or a bound is not finite.
    pub fn new(x1: f64, x2: f64, y1: f64, y2: f64, z1: f64, z2: f64) -> Result<Self> {
        let bounds = [[x1, x2], [y1, y2], [z1, z2]];
        for (axis, [lo, hi]) in ["x", "y", "z"].iter().zip(bounds) {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(SimulationError::Configuration(format!(
                    "box {axis} bounds must be finite, got [{lo}, {hi}]"
                )));
            }
            if hi <= lo {
                return Err(SimulationError::Configuration(format!(
                    "box {axis} extent must be positive, got [{lo}, {hi}]"
                )));
            }
        }
        Ok(Self { bounds })
    }

    /// Cube centered on the origin with the given half side.
    pub fn centered_cube(half_side: f64) -> Result<Self> {
        Self::new(-half_side, half_side, -half_side, half_side, -half_side, half_side)
    }

    /// `(lo, hi)` bounds along one axis.
    pub fn bounds(&self, axis: Axis) -> (f64, f64) {
        let [lo, hi] = self.bounds[axis as usize];
        (lo, hi)
    }

    /// Side length along one axis.
    pub fn extent(&self, axis: Axis) -> f64 {
        let (lo, hi) = self.bounds(axis);
        hi - lo
    }

    /// Box volume in m³.
    pub fn volume(&self) -> f64 {
        Axis::ALL.iter().map(|&a| self.extent(a)).product()
    }

    /// Box volume in liters.
    pub fn volume_liters(&self) -> f64 {
        self.volume() * 1e3
    }

    /// Whether a point lies in the half-open box `[lo, hi)` on every axis.
    pub fn contains(&self, position: [f64; 3]) -> bool {
        Axis::ALL.iter().zip(position).all(|(&axis, v)| {
            let (lo, hi) = self.bounds(axis);
            v >= lo && v < hi
        })
    }
}

impl fmt::Display for SimulationBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Box: X {:.1}um, Y {:.1}um, Z {:.1}um",
            self.extent(Axis::X) * 1e6,
            self.extent(Axis::Y) * 1e6,
            self.extent(Axis::Z) * 1e6
        )
    }
}

/// A diffusing point particle, identified by its index in the particle list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Initial position (x0, y0, z0) in meters
    pub r0: [f64; 3],
}

impl Particle {
    pub fn new(x0: f64, y0: f64, z0: f64) -> Self {
        Self { r0: [x0, y0, z0] }
    }

    pub fn at_origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Generate `n` particles with uniformly random initial positions in `sim_box`.
pub fn gen_particles<R: Rng + ?Sized>(n: usize, sim_box: &SimulationBox, rng: &mut R) -> Vec<Particle> {
    (0..n)
        .map(|_| {
            let mut r0 = [0.0; 3];
            for (axis, coord) in Axis::ALL.iter().zip(r0.iter_mut()) {
                let (lo, hi) = sim_box.bounds(*axis);
                *coord = lo + rng.gen::<f64>() * (hi - lo);
            }
            Particle { r0 }
        })
        .collect()
}

/// Molar concentration of `num_particles` in the box, in mol/L.
pub fn concentration(num_particles: usize, sim_box: &SimulationBox) -> f64 {
    (num_particles as f64 / AVOGADRO) / sim_box.volume_liters()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn confocal_box() -> SimulationBox {
        SimulationBox::new(-4e-6, 4e-6, -4e-6, 4e-6, -6e-6, 6e-6).unwrap()
    }

    #[test]
    fn test_volume() {
        let b = confocal_box();
        assert_relative_eq!(b.volume(), 8e-6 * 8e-6 * 12e-6, max_relative = 1e-12);
        assert_relative_eq!(b.volume_liters(), b.volume() * 1e3, max_relative = 1e-12);
    }

    #[test]
    fn test_display() {
        assert_eq!(confocal_box().to_string(), "Box: X 8.0um, Y 8.0um, Z 12.0um");
    }

    #[test]
    fn test_rejects_non_positive_extent() {
        assert!(matches!(
            SimulationBox::new(1.0, 1.0, 0.0, 1.0, 0.0, 1.0),
            Err(SimulationError::Configuration(_))
        ));
        assert!(matches!(
            SimulationBox::new(0.0, 1.0, 0.0, 1.0, 2.0, 1.0),
            Err(SimulationError::Configuration(_))
        ));
        assert!(SimulationBox::new(0.0, f64::NAN, 0.0, 1.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_generated_particles_inside_box() {
        let b = confocal_box();
        let mut rng = StdRng::seed_from_u64(7);
        let particles = gen_particles(500, &b, &mut rng);
        assert_eq!(particles.len(), 500);
        assert!(particles.iter().all(|p| b.contains(p.r0)));
    }

    #[test]
    fn test_concentration() {
        // 1 µm³ box = 1e-15 L
        let b = SimulationBox::new(0.0, 1e-6, 0.0, 1e-6, 0.0, 1e-6).unwrap();
        let c = concentration(1, &b);
        assert_relative_eq!(c, 1.0 / AVOGADRO / 1e-15, max_relative = 1e-9);
    }

    #[test]
    fn test_serde_validates_bounds() {
        let b = confocal_box();
        let json = serde_json::to_string(&b).unwrap();
        let back: SimulationBox = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);

        let bad = r#"{"x1":0.0,"x2":-1.0,"y1":0.0,"y2":1.0,"z1":0.0,"z2":1.0}"#;
        assert!(serde_json::from_str::<SimulationBox>(bad).is_err());
    }
}
