//! Independent simulation runs executed as request/response messages.
//!
//! A [`WorkerRequest`] carries everything a run needs. Workers share nothing
//! but the read-only PSF, keep their arrays in [`MemoryStorage`] and answer
//! with a [`WorkerResponse`]. Batches of requests run in parallel on the rayon
//! thread pool.

use crate::errors::{Result, SimulationError};
use crate::geometry::{Particle, SimulationBox};
use crate::merge::{merge_ph_times, EmissionRun};
use crate::params::SimulationParameters;
use crate::photons::PhotonConfig;
use crate::psf::Psf;
use crate::simulation::{ParticlesSimulation, RunOptions};
use crate::storage::MemoryStorage;
use crate::timestamps::{DitherTable, PhotonTimestamps};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use shared::algo::stream_seed;
use std::sync::Arc;

/// Output a worker should send back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestedOutput {
    Emission,
    Timestamps,
}

/// A complete, self-contained run description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub params: SimulationParameters,
    pub sim_box: SimulationBox,
    pub particles: Vec<Particle>,
    pub options: RunOptions,
    pub photons: PhotonConfig,
    pub output: RequestedOutput,
}

impl WorkerRequest {
    /// Copies of this request for `num_engines` engines.
    ///
    /// Engine `i` gets `eid = i` and its own seed derived from the request
    /// seed, so the copies simulate independent realizations.
    pub fn for_engines(&self, num_engines: usize) -> Vec<WorkerRequest> {
        (0..num_engines)
            .map(|i| {
                let mut request = self.clone();
                request.params.eid = i as u32;
                request.options.seed = stream_seed(self.options.seed, i);
                request
            })
            .collect()
    }
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    Emission(EmissionRun),
    Timestamps {
        timestamps: PhotonTimestamps,
        params: SimulationParameters,
        core_name: String,
    },
}

/// Execute one request against in-memory storage.
pub fn run_worker(request: WorkerRequest, psf: Arc<dyn Psf>) -> Result<WorkerResponse> {
    let WorkerRequest {
        params,
        sim_box,
        particles,
        options,
        photons,
        output,
    } = request;
    debug!("Worker EID {} ID {} starting", params.eid, params.id);

    let mut sim = ParticlesSimulation::new(
        params,
        sim_box,
        particles,
        Box::new(psf),
        MemoryStorage::new(),
        options,
    )?;
    sim.simulate_motion_emission()?;

    let response = match output {
        RequestedOutput::Emission => WorkerResponse::Emission(sim.emission_run()?),
        RequestedOutput::Timestamps => {
            sim.simulate_timetrace_total(&photons)?;
            WorkerResponse::Timestamps {
                timestamps: sim.timestamps_total(&DitherTable::decimal())?,
                params,
                core_name: sim.compact_name_core(),
            }
        }
    };
    debug!("Worker EID {} ID {} done", params.eid, params.id);
    Ok(response)
}

/// Execute requests in parallel. Responses keep the order of the requests.
pub fn run_workers(requests: Vec<WorkerRequest>, psf: Arc<dyn Psf>) -> Result<Vec<WorkerResponse>> {
    info!("Running {} independent simulations", requests.len());
    requests
        .into_par_iter()
        .map(|request| run_worker(request, Arc::clone(&psf)))
        .collect()
}

/// Timestamps of several runs joined into one long acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTimestamps {
    /// Photon times in seconds
    pub times: Vec<f64>,
    /// Total simulated duration in seconds
    pub total_duration: f64,
    /// Core name shared by the runs
    pub name: String,
}

/// Simulate timestamps on independent workers and concatenate them in time.
///
/// Run `i` is shifted by `i · t_max` of the first run; all runs are expected
/// to share `t_max`.
pub fn parallel_gen_timestamps(
    requests: Vec<WorkerRequest>,
    psf: Arc<dyn Psf>,
) -> Result<MergedTimestamps> {
    let requests: Vec<WorkerRequest> = requests
        .into_iter()
        .map(|mut r| {
            r.output = RequestedOutput::Timestamps;
            r
        })
        .collect();
    let responses = run_workers(requests, psf)?;

    let mut ph_times = Vec::with_capacity(responses.len());
    let mut durations = Vec::with_capacity(responses.len());
    let mut names = Vec::with_capacity(responses.len());
    for response in responses {
        match response {
            WorkerResponse::Timestamps {
                timestamps,
                params,
                core_name,
            } => {
                ph_times.push(timestamps.seconds());
                durations.push(params.t_max);
                names.push(core_name);
            }
            WorkerResponse::Emission(_) => {
                return Err(SimulationError::ParameterMismatch(
                    "worker returned emission instead of timestamps".to_string(),
                ))
            }
        }
    }

    let (Some(&block), Some(name)) = (durations.first(), names.first().cloned()) else {
        return Err(SimulationError::Configuration(
            "no worker requests given".to_string(),
        ));
    };
    let times = merge_ph_times(&ph_times, block);
    info!("Merged {} timestamps from {} runs", times.len(), ph_times.len());
    Ok(MergedTimestamps {
        times,
        total_duration: durations.iter().sum(),
        name,
    })
}
