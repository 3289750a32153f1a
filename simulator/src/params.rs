//! Simulation parameters and run configuration.

use crate::emission::EmissionMode;
use crate::errors::{Result, SimulationError};
use crate::geometry::{concentration, SimulationBox};
use crate::photons::PhotonConfig;
use crate::psf::{ConstantPsf, GaussianPsf, Psf, TabulatedPsf};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default number of samples per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 19;

/// Physical and bookkeeping parameters of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Diffusion coefficient in m²/s
    pub diffusion: f64,
    /// Time step in seconds
    pub t_step: f64,
    /// Total simulated time in seconds
    pub t_max: f64,
    pub num_particles: usize,
    /// Run identifier, distinguishes repeated runs with equal parameters
    pub id: u32,
    /// Engine identifier, distinguishes runs executed by different workers
    pub eid: u32,
}

impl SimulationParameters {
    pub fn new(diffusion: f64, t_step: f64, t_max: f64, num_particles: usize) -> Result<Self> {
        let params = Self {
            diffusion,
            t_step,
            t_max,
            num_particles,
            id: 0,
            eid: 0,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_ids(mut self, eid: u32, id: u32) -> Self {
        self.eid = eid;
        self.id = id;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.diffusion, self.t_step, self.t_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(SimulationError::Configuration(
                "diffusion, t_step and t_max must be finite".to_string(),
            ));
        }
        if self.diffusion < 0.0 {
            return Err(SimulationError::Configuration(format!(
                "diffusion coefficient must be non-negative, got {}",
                self.diffusion
            )));
        }
        if self.t_step <= 0.0 {
            return Err(SimulationError::Configuration(format!(
                "t_step must be positive, got {}",
                self.t_step
            )));
        }
        if self.t_max < self.t_step {
            return Err(SimulationError::Configuration(format!(
                "t_max ({}) must be at least t_step ({})",
                self.t_max, self.t_step
            )));
        }
        Ok(())
    }

    /// Number of time samples, `floor(t_max / t_step)`.
    pub fn n_samples(&self) -> usize {
        let ratio = self.t_max / self.t_step;
        let nearest = ratio.round();
        // Absorb representation error of decimal step sizes such as 1e-4 / 1e-6
        if (ratio - nearest).abs() <= 1e-9 * nearest.max(1.0) {
            nearest as usize
        } else {
            ratio.floor() as usize
        }
    }

    /// Standard deviation of each per-axis displacement, `sqrt(6 D t_step)`.
    pub fn sigma(&self) -> f64 {
        (6.0 * self.diffusion * self.t_step).sqrt()
    }

    /// Compact parameter string without run identifiers and duration.
    ///
    /// Runs that differ only in ID or length share the same core name.
    pub fn compact_name_core(&self, sim_box: &SimulationBox) -> String {
        let pico_molar = concentration(self.num_particles, sim_box) * 1e12;
        format!(
            "D{}_{}P_{}pM_step{:.1}us",
            format_g2(self.diffusion),
            self.num_particles,
            pico_molar.trunc() as u64,
            self.t_step * 1e6
        )
    }

    /// Compact string of all parameters, unique per run.
    pub fn compact_name(&self, sim_box: &SimulationBox) -> String {
        format!(
            "{}_t_max{:.1}s_ID{}-{}",
            self.compact_name_core(sim_box),
            self.t_max,
            self.eid,
            self.id
        )
    }

    /// Parameter table stored alongside the simulated arrays.
    pub fn params_table(&self, sim_box: &SimulationBox) -> Vec<ParamEntry> {
        let entry = |name: &str, value: f64, description: &str| ParamEntry {
            name: name.to_string(),
            value,
            description: description.to_string(),
        };
        vec![
            entry("D", self.diffusion, "Diffusion coefficient (m^2/s)"),
            entry("t_step", self.t_step, "Simulation time-step (s)"),
            entry("t_max", self.t_max, "Simulation total time (s)"),
            entry("ID", f64::from(self.id), "Simulation ID (int)"),
            entry("EID", f64::from(self.eid), "Engine ID (int)"),
            entry("np", self.num_particles as f64, "Number of simulated particles"),
            entry(
                "pico_mol",
                concentration(self.num_particles, sim_box) * 1e12,
                "Particles concentration (pM)",
            ),
        ]
    }

    pub fn memory_estimate(&self) -> MemoryEstimate {
        MemoryEstimate::new(self.n_samples(), self.num_particles)
    }
}

/// One row of the parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub name: String,
    pub value: f64,
    pub description: String,
}

/// Everything a resumed run has to share with the run that started its arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub params: Vec<ParamEntry>,
    pub seed: u64,
    pub emission_mode: EmissionMode,
    /// Name of the PSF the emission was computed with
    pub psf: String,
    /// Recorded for reference, resumed runs may use another chunk size
    pub chunk_size: usize,
}

impl RunMetadata {
    /// Check that a run described by `self` may continue the `stored` one.
    ///
    /// Parameter values are compared with a relative tolerance of 1e-12.
    pub fn ensure_matches(&self, stored: &RunMetadata) -> Result<()> {
        let mut diffs = Vec::new();
        if self.params.len() != stored.params.len() {
            diffs.push(format!(
                "{} parameters vs {} stored",
                self.params.len(),
                stored.params.len()
            ));
        }
        for (new, old) in self.params.iter().zip(&stored.params) {
            let scale = new.value.abs().max(old.value.abs());
            if new.name != old.name || (new.value - old.value).abs() > 1e-12 * scale {
                diffs.push(format!(
                    "{} = {} vs stored {} = {}",
                    new.name, new.value, old.name, old.value
                ));
            }
        }
        if self.seed != stored.seed {
            diffs.push(format!("seed {} vs stored {}", self.seed, stored.seed));
        }
        if self.emission_mode != stored.emission_mode {
            diffs.push(format!(
                "emission mode {:?} vs stored {:?}",
                self.emission_mode, stored.emission_mode
            ));
        }
        if self.psf != stored.psf {
            diffs.push(format!("psf {} vs stored {}", self.psf, stored.psf));
        }
        if diffs.is_empty() {
            Ok(())
        } else {
            Err(SimulationError::ParameterMismatch(format!(
                "cannot resume stored run: {}",
                diffs.join(", ")
            )))
        }
    }
}

/// Format `value` with two significant digits like C's `%.2g`.
///
/// `1e-11` gives `"1e-11"`, `1.2e-11` gives `"1.2e-11"`, `0.5` gives `"0.5"`.
pub fn format_g2(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let sci = format!("{value:.1e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return sci,
    };
    if (-4..2).contains(&exp) {
        let decimals = (1 - exp).max(0) as usize;
        let fixed = format!("{value:.decimals$}");
        return trim_fraction(&fixed).to_string();
    }
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Whether particle positions are kept in storage after emission is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrajectoryRetention {
    #[default]
    Discard,
    Keep,
}

/// Size of the arrays a run would produce if held in memory at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryEstimate {
    pub n_samples: usize,
    pub num_particles: usize,
    pub emission_total_bytes: usize,
    pub emission_per_particle_bytes: usize,
    pub positions_bytes: usize,
}

impl MemoryEstimate {
    pub fn new(n_samples: usize, num_particles: usize) -> Self {
        let row = n_samples * std::mem::size_of::<f64>();
        Self {
            n_samples,
            num_particles,
            emission_total_bytes: row,
            emission_per_particle_bytes: row * num_particles,
            positions_bytes: 3 * row * num_particles,
        }
    }

    pub fn log(&self) {
        info!("  Number of particles: {}", self.num_particles);
        info!("  Number of time steps: {}", self.n_samples);
        info!(
            "  Emission array size: {:.1} MB (aggregate)",
            to_mib(self.emission_total_bytes)
        );
        info!(
            "  Emission array size: {:.1} MB (per particle)",
            to_mib(self.emission_per_particle_bytes)
        );
        info!("  Position array size: {:.1} MB", to_mib(self.positions_bytes));
    }
}

fn to_mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// PSF selection in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PsfConfig {
    Gaussian {
        sigma_radial: f64,
        sigma_axial: f64,
        #[serde(default)]
        center_axial: f64,
    },
    Tabulated {
        path: PathBuf,
    },
    Constant {
        value: f64,
    },
}

impl Default for PsfConfig {
    fn default() -> Self {
        PsfConfig::Gaussian {
            sigma_radial: 0.2e-6,
            sigma_axial: 0.6e-6,
            center_axial: 0.0,
        }
    }
}

impl PsfConfig {
    pub fn build(&self) -> Result<Box<dyn Psf>> {
        Ok(match self {
            PsfConfig::Gaussian {
                sigma_radial,
                sigma_axial,
                center_axial,
            } => Box::new(GaussianPsf::new(*sigma_radial, *sigma_axial)?.with_center(*center_axial)),
            PsfConfig::Tabulated { path } => Box::new(TabulatedPsf::load_from_file(path)?),
            PsfConfig::Constant { value } => Box::new(ConstantPsf(*value)),
        })
    }
}

/// Complete description of a simulation, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub params: SimulationParameters,
    pub sim_box: SimulationBox,
    #[serde(default)]
    pub psf: PsfConfig,
    #[serde(default)]
    pub photons: PhotonConfig,
    #[serde(default)]
    pub emission_mode: EmissionMode,
    #[serde(default)]
    pub retention: TrajectoryRetention,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub seed: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        self.photons.validate()?;
        if self.chunk_size == 0 {
            return Err(SimulationError::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SimulationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            SimulationError::Configuration(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SimulationError::Configuration(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            SimulationError::Configuration(format!("cannot write {}: {e}", path.display()))
        })
    }
}

/// Human-readable run summary, as printed at the start of a run.
pub struct RunSummary<'a> {
    pub params: &'a SimulationParameters,
    pub sim_box: &'a SimulationBox,
}

impl fmt::Display for RunSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.sim_box)?;
        write!(
            f,
            "D {:.2e}, #Particles {}, t_step {:.1}us, t_max {:.1}s EID_ID {} {}",
            self.params.diffusion,
            self.params.num_particles,
            self.params.t_step * 1e6,
            self.params.t_max,
            self.params.eid,
            self.params.id
        )
    }
}
