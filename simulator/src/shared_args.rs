use crate::emission::EmissionMode;
use crate::errors::Result;
use crate::geometry::SimulationBox;
use crate::params::{
    PsfConfig, SimulationConfig, SimulationParameters, TrajectoryRetention, DEFAULT_CHUNK_SIZE,
};
use crate::photons::PhotonConfig;
use clap::Parser;
use std::path::PathBuf;

/// Parse box half-sides string in format "half_x,half_y,half_z" (micrometers)
fn parse_half_sides(s: &str) -> Result<(f64, f64, f64), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err("Box must be in format 'half_x,half_y,half_z'".to_string());
    }

    let mut values = [0.0; 3];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("Invalid box half-side '{}'", part.trim()))?;
    }

    Ok((values[0], values[1], values[2]))
}

/// Common arguments shared across simulation binaries
#[derive(Parser, Debug, Clone)]
pub struct SharedSimulationArgs {
    /// Diffusion coefficient in um^2/s
    #[arg(long, default_value_t = 12.0)]
    pub diffusion: f64,

    /// Simulation time step in microseconds
    #[arg(long, default_value_t = 0.5)]
    pub t_step_us: f64,

    /// Total simulated time in seconds
    #[arg(long, default_value_t = 0.3)]
    pub t_max: f64,

    /// Number of particles, placed uniformly at random in the box
    #[arg(long, default_value_t = 15)]
    pub num_particles: usize,

    /// Box half-sides in micrometers (format: "half_x,half_y,half_z")
    #[arg(long, default_value = "4.0,4.0,6.0", value_parser = parse_half_sides)]
    pub half_sides: (f64, f64, f64),

    /// Radial PSF sigma in micrometers
    #[arg(long, default_value_t = 0.2)]
    pub psf_sigma_radial: f64,

    /// Axial PSF sigma in micrometers
    #[arg(long, default_value_t = 0.6)]
    pub psf_sigma_axial: f64,

    /// Tabulated PSF (JSON) used instead of the Gaussian model
    #[arg(long)]
    pub psf_file: Option<PathBuf>,

    /// Peak emission rate in counts per second
    #[arg(long, default_value_t = 200e3)]
    pub max_em_rate: f64,

    /// Background rate in counts per second
    #[arg(long, default_value_t = 1e3)]
    pub bg_rate: f64,

    /// Samples per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Random seed for particle placement, motion and photons
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Store emission of each particle instead of the total
    #[arg(long, default_value_t = false)]
    pub per_particle: bool,

    /// Keep particle trajectories in storage
    #[arg(long, default_value_t = false)]
    pub keep_trajectories: bool,

    /// Run ID
    #[arg(long, default_value_t = 0)]
    pub id: u32,

    /// Enable debug output
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl SharedSimulationArgs {
    /// Convert command line units to a validated configuration.
    pub fn to_config(&self) -> Result<SimulationConfig> {
        let params = SimulationParameters::new(
            self.diffusion * 1e-12,
            self.t_step_us * 1e-6,
            self.t_max,
            self.num_particles,
        )?
        .with_ids(0, self.id);
        let (hx, hy, hz) = self.half_sides;
        let sim_box = SimulationBox::new(
            -hx * 1e-6,
            hx * 1e-6,
            -hy * 1e-6,
            hy * 1e-6,
            -hz * 1e-6,
            hz * 1e-6,
        )?;
        let psf = match &self.psf_file {
            Some(path) => PsfConfig::Tabulated { path: path.clone() },
            None => PsfConfig::Gaussian {
                sigma_radial: self.psf_sigma_radial * 1e-6,
                sigma_axial: self.psf_sigma_axial * 1e-6,
                center_axial: 0.0,
            },
        };
        let config = SimulationConfig {
            params,
            sim_box,
            psf,
            photons: PhotonConfig::new(self.max_em_rate, self.bg_rate)?,
            emission_mode: if self.per_particle {
                EmissionMode::PerParticle
            } else {
                EmissionMode::Aggregate
            },
            retention: if self.keep_trajectories {
                TrajectoryRetention::Keep
            } else {
                TrajectoryRetention::Discard
            },
            chunk_size: self.chunk_size,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}
