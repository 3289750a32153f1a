//! Brownian motion simulation of particles in a confocal volume
//!
//! This crate simulates point particles diffusing through a box around the
//! focal spot of a confocal microscope, the emission they produce while
//! crossing the point spread function, the Poisson photon counts a detector
//! would register, and the resulting photon timestamps. Long runs are
//! processed in chunks and stored through a pluggable storage backend, so the
//! memory footprint does not grow with the simulated duration.

pub mod algo;
pub mod emission;
pub mod errors;
pub mod geometry;
pub mod merge;
pub mod params;
pub mod photons;
pub mod psf;
pub mod record;
pub mod shared_args;
pub mod simulation;
pub mod storage;
pub mod timestamps;
pub mod trajectory;
pub mod worker;

// Re-exports for easier access
pub use emission::EmissionMode;
pub use errors::{SimulationError, StorageError};
pub use geometry::{gen_particles, Particle, SimulationBox};
pub use merge::{merge_da_ph_times, merge_particle_emission, merge_ph_times, merge_timestamps};
pub use params::{SimulationConfig, SimulationParameters, TrajectoryRetention};
pub use photons::PhotonConfig;
pub use psf::{ConstantPsf, GaussianPsf, Psf, TabulatedPsf};
pub use record::{find_record, SimulationRecord};
pub use simulation::{ParticlesSimulation, RunOptions};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use timestamps::{DitherTable, PhotonTimestamps};
pub use worker::{parallel_gen_timestamps, run_workers, WorkerRequest, WorkerResponse};
