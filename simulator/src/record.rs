//! Serializable description of a simulation run.
//!
//! A record holds everything needed to rebuild a [`ParticlesSimulation`]
//! except the PSF model, which is supplied again when the run is restored, and
//! the simulated arrays, which stay in their storage backend.

use crate::errors::{Result, SimulationError, StorageError};
use crate::geometry::{Particle, SimulationBox};
use crate::params::SimulationParameters;
use crate::psf::Psf;
use crate::simulation::{ParticlesSimulation, RunOptions};
use crate::storage::{Storage, StorageLocation};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persistent description of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub params: SimulationParameters,
    pub sim_box: SimulationBox,
    pub particles: Vec<Particle>,
    /// Name of the PSF model the run was simulated with
    pub psf: String,
    pub options: RunOptions,
    pub storage: StorageLocation,
}

impl SimulationRecord {
    /// File name of this record: `{prefix}_{compact_name}.json`.
    pub fn file_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}.json", self.params.compact_name(&self.sim_box))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(StorageError::from)?;
        fs::write(path, json).map_err(StorageError::from)?;
        info!("Saved run record to {}", path.display());
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(StorageError::from)?;
        let record = serde_json::from_str(&json).map_err(StorageError::from)?;
        info!("Loaded run record {}", path.display());
        Ok(record)
    }

    /// Save into `dir` under [`SimulationRecord::file_name`].
    pub fn save_in_dir(&self, dir: &Path, prefix: &str) -> Result<PathBuf> {
        let path = dir.join(self.file_name(prefix));
        self.save_to_file(&path)?;
        Ok(path)
    }

    /// Load the record a run with these parameters would have saved in `dir`.
    ///
    /// Returns `None` if no such file exists.
    pub fn load_matching(
        dir: &Path,
        prefix: &str,
        params: &SimulationParameters,
        sim_box: &SimulationBox,
    ) -> Result<Option<Self>> {
        let path = dir.join(format!("{prefix}_{}.json", params.compact_name(sim_box)));
        if !path.exists() {
            info!("No matching run record in {}", dir.display());
            return Ok(None);
        }
        Self::load_from_file(&path).map(Some)
    }
}

/// Locate the record of run `id` on engine `eid` in `dir`.
///
/// Exactly one file named `{prefix}*ID{eid}-{id}.json` must exist.
pub fn find_record(dir: &Path, prefix: &str, eid: u32, id: u32) -> Result<PathBuf> {
    let suffix = format!("ID{eid}-{id}.json");
    let mut matches = Vec::new();
    for entry in fs::read_dir(dir).map_err(StorageError::from)? {
        let entry = entry.map_err(StorageError::from)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(&suffix) {
            matches.push(entry.path());
        }
    }
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(SimulationError::ParameterMismatch(format!(
            "no run record matches {prefix}*{suffix} in {}",
            dir.display()
        ))),
        n => Err(SimulationError::ParameterMismatch(format!(
            "{n} run records match {prefix}*{suffix} in {}",
            dir.display()
        ))),
    }
}

impl<S: Storage> ParticlesSimulation<S> {
    /// Explicit description of this run.
    pub fn record(&self) -> SimulationRecord {
        SimulationRecord {
            params: *self.params(),
            sim_box: *self.sim_box(),
            particles: self.particles().to_vec(),
            psf: self.psf().name().to_string(),
            options: self.options().clone(),
            storage: self.storage().location(),
        }
    }

    /// Rebuild a run from its record.
    ///
    /// Fails with [`SimulationError::ParameterMismatch`] if the stored particle
    /// list does not match the stored particle count.
    pub fn from_record(record: SimulationRecord, psf: Box<dyn Psf>, storage: S) -> Result<Self> {
        if psf.name() != record.psf {
            warn!(
                "Restoring a run simulated with PSF '{}' using PSF '{}'",
                record.psf,
                psf.name()
            );
        }
        Self::new(
            record.params,
            record.sim_box,
            record.particles,
            psf,
            storage,
            record.options,
        )
    }
}
