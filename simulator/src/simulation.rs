//! Chunked Brownian motion and emission simulation of a set of particles.
//!
//! A run walks every particle through the box one chunk of samples at a time,
//! converts the positions into emission through the PSF, and appends the
//! emission of the chunk to storage before moving on. Peak memory is bounded
//! by the chunk size times the number of particles, regardless of the total
//! duration. The same staged layout is used for the photon stages: timetraces
//! are sampled from stored emission chunk by chunk, and timestamps are
//! synthesized from stored timetraces.
//!
//! Every random quantity comes from a stream derived from the run seed: one
//! stream per particle for the motion, and a salted family of streams for
//! photon sampling. The outputs are therefore a function of the parameters and
//! the seed only, independent of the chunk size and of interruptions.

use crate::emission::{particle_emission, sum_rows, EmissionBuffer, EmissionMode};
use crate::errors::{Result, SimulationError, StorageError};
use crate::geometry::{Particle, SimulationBox};
use crate::merge::EmissionRun;
use crate::params::{
    RunMetadata, RunSummary, SimulationParameters, TrajectoryRetention, DEFAULT_CHUNK_SIZE,
};
use crate::photons::{sample_timetrace, sample_timetrace_rows, PhotonConfig};
use crate::psf::Psf;
use crate::storage::{ArrayParams, ChunkedArray, Storage};
use crate::timestamps::{extend_halving_times, DitherTable, PhotonTimestamps, TimestampStream};
use crate::trajectory::ParticleWalker;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use shared::algo::{
    map_chunks, reduce_chunks, seeded_streams, stream_seed, ChunkSizes, ChunkSlices,
    StreamingStats,
};
use std::collections::HashMap;

/// Name of the emission array.
pub const EMISSION_ARRAY: &str = "emission";
/// Name of the aggregate timetrace array.
pub const TIMETRACE_TOTAL_ARRAY: &str = "timetrace";
/// Name of the per-particle timetrace array.
pub const TIMETRACE_PER_PARTICLE_ARRAY: &str = "timetrace_p";

/// Name of the position array of particle `index`.
pub fn position_array(index: usize) -> String {
    format!("position_{index}")
}

/// Salts separating the photon stream families from the motion streams and
/// from each other.
const PHOTON_TOTAL_SALT: u64 = 0x7074_6F74_616C_0001;
const PHOTON_PARTICLE_SALT: u64 = 0x7074_7061_7274_0002;

/// Options fixed at run construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub emission_mode: EmissionMode,
    pub retention: TrajectoryRetention,
    pub chunk_size: usize,
    pub seed: u64,
    /// Recreate existing arrays instead of resuming them
    pub overwrite: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            emission_mode: EmissionMode::default(),
            retention: TrajectoryRetention::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            seed: 0,
            overwrite: true,
        }
    }
}

impl RunOptions {
    fn array_params(&self) -> ArrayParams {
        ArrayParams {
            chunk_size: self.chunk_size,
            compression: None,
            overwrite: self.overwrite,
        }
    }
}

/// Brownian motion simulation of a set of particles in a confocal volume.
pub struct ParticlesSimulation<S: Storage> {
    params: SimulationParameters,
    sim_box: SimulationBox,
    particles: Vec<Particle>,
    psf: Box<dyn Psf>,
    storage: S,
    options: RunOptions,
    time_axes: HashMap<usize, Array1<f64>>,
}

impl<S: Storage> ParticlesSimulation<S> {
    /// Set up a run.
    ///
    /// Fails if the particle list does not match the particle count of
    /// `params`, if the parameters are invalid, or if the chunk size is zero.
    pub fn new(
        params: SimulationParameters,
        sim_box: SimulationBox,
        particles: Vec<Particle>,
        psf: Box<dyn Psf>,
        storage: S,
        options: RunOptions,
    ) -> Result<Self> {
        params.validate()?;
        if particles.len() != params.num_particles {
            return Err(SimulationError::ParameterMismatch(format!(
                "{} particles given for a run of {} particles",
                particles.len(),
                params.num_particles
            )));
        }
        if options.chunk_size == 0 {
            return Err(SimulationError::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            params,
            sim_box,
            particles,
            psf,
            storage,
            options,
            time_axes: HashMap::new(),
        })
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    pub fn sim_box(&self) -> &SimulationBox {
        &self.sim_box
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn psf(&self) -> &dyn Psf {
        self.psf.as_ref()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn n_samples(&self) -> usize {
        self.params.n_samples()
    }

    pub fn compact_name(&self) -> String {
        self.params.compact_name(&self.sim_box)
    }

    pub fn compact_name_core(&self) -> String {
        self.params.compact_name_core(&self.sim_box)
    }

    /// Description of the run stored with its arrays.
    pub fn run_metadata(&self) -> RunMetadata {
        RunMetadata {
            params: self.params.params_table(&self.sim_box),
            seed: self.options.seed,
            emission_mode: self.options.emission_mode,
            psf: self.psf.name().to_string(),
            chunk_size: self.options.chunk_size,
        }
    }

    pub fn summary(&self) -> RunSummary<'_> {
        RunSummary {
            params: &self.params,
            sim_box: &self.sim_box,
        }
    }

    /// Simulate the motion of every particle and store its emission.
    ///
    /// If the storage already holds a partial run and the run was created
    /// without `overwrite`, the simulation continues from the last flushed
    /// sample. Walkers are fast-forwarded to that sample, so a resumed run
    /// produces the same arrays as an uninterrupted one. Resuming fails with
    /// [`SimulationError::ParameterMismatch`] before touching any array if the
    /// stored run was made with other parameters, seed, emission mode or PSF.
    pub fn simulate_motion_emission(&mut self) -> Result<()> {
        let n_samples = self.n_samples();
        let num_particles = self.particles.len();
        let mode = self.options.emission_mode;
        let keep_positions = self.options.retention == TrajectoryRetention::Keep;

        info!("Simulating motion and emission");
        info!("{}", self.summary());
        self.params.memory_estimate().log();

        let metadata = self.run_metadata();
        if !self.options.overwrite {
            match self.storage.load_metadata() {
                Ok(stored) => metadata.ensure_matches(&stored)?,
                Err(StorageError::NotFound(_)) => {
                    debug!("No stored run description, starting a new one")
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.storage.save_metadata(&metadata)?;

        let array_params = self.options.array_params();
        let mut emission = self.storage.create_array::<f64>(
            EMISSION_ARRAY,
            mode.rows(num_particles),
            array_params.clone(),
        )?;
        let mut positions: Vec<Box<dyn ChunkedArray<f64>>> = Vec::new();
        if keep_positions {
            for i in 0..num_particles {
                positions.push(self.storage.create_array::<f64>(
                    &position_array(i),
                    3,
                    array_params.clone(),
                )?);
            }
        }

        // Every array must agree on where the run resumes
        let start = positions
            .iter()
            .map(|p| p.len())
            .fold(emission.len(), usize::min)
            .min(n_samples);
        emission.truncate(start)?;
        for p in &mut positions {
            p.truncate(start)?;
        }
        if start == n_samples {
            info!("Emission already complete ({} samples)", n_samples);
            return Ok(());
        }

        let sigma = self.params.sigma();
        let mut walkers: Vec<ParticleWalker> = self
            .particles
            .iter()
            .enumerate()
            .map(|(i, p)| ParticleWalker::new(p, i, sigma, self.options.seed))
            .collect();
        if start > 0 {
            warn!(
                "Resuming run {} at sample {} of {}",
                self.compact_name(),
                start,
                n_samples
            );
            for walker in &mut walkers {
                walker.skip(start, &self.sim_box);
            }
        }

        let mut done = start;
        for chunk_len in ChunkSizes::new(n_samples - start, self.options.chunk_size) {
            let mut buffer = EmissionBuffer::new(mode, num_particles, chunk_len);
            for (i, walker) in walkers.iter_mut().enumerate() {
                let pos = walker.advance(chunk_len, &self.sim_box);
                let em = particle_emission(pos.view(), self.psf.as_ref());
                buffer.accumulate(i, &em);
                if keep_positions {
                    positions[i].append(pos.view())?;
                }
            }
            emission.append(buffer.into_rows().view())?;

            for p in &mut positions {
                p.flush()?;
            }
            emission.flush()?;
            done += chunk_len;
            debug!("Emission chunk done: {}/{} samples", done, n_samples);
        }

        info!("Emission simulation complete: {} samples", n_samples);
        Ok(())
    }

    fn completed_emission(&self) -> Result<Box<dyn ChunkedArray<f64>>> {
        let emission = self.storage.open_array::<f64>(EMISSION_ARRAY)?;
        if emission.len() != self.n_samples() {
            return Err(SimulationError::Configuration(format!(
                "emission covers {} of {} samples, simulate motion first",
                emission.len(),
                self.n_samples()
            )));
        }
        Ok(emission)
    }

    /// Sample the photon counts of the total emission.
    ///
    /// Per-particle emission is summed over particles first. The timetrace is
    /// regenerated from scratch on every call.
    pub fn simulate_timetrace_total(&mut self, photons: &PhotonConfig) -> Result<()> {
        photons.validate()?;
        let emission = self.completed_emission()?;
        let n_samples = emission.len();
        info!(
            "Simulating total timetrace (max_em_rate {}, bg_rate {})",
            photons.max_em_rate, photons.bg_rate
        );

        let mut params = self.options.array_params();
        params.overwrite = true;
        let mut timetrace = self
            .storage
            .create_array::<u8>(TIMETRACE_TOTAL_ARRAY, 1, params)?;
        let mut rng = StdRng::seed_from_u64(stream_seed(
            self.options.seed ^ PHOTON_TOTAL_SALT,
            0,
        ));

        let t_step = self.params.t_step;
        map_chunks(
            n_samples,
            self.options.chunk_size,
            |range| emission.read(range).map_err(SimulationError::from),
            |em: Array2<f64>| sum_rows(em.view()),
            |total: Array1<f64>| -> Result<()> {
                let counts = sample_timetrace(total.view(), photons, t_step, &mut rng)?;
                timetrace.append(counts.insert_axis(Axis(0)).view())?;
                Ok(timetrace.flush()?)
            },
        )?;
        debug!("Total timetrace stored: {} bins", timetrace.len());
        Ok(())
    }

    /// Sample the photon counts of every particle separately.
    ///
    /// Requires a run in [`EmissionMode::PerParticle`]. The background rate is
    /// added to each particle's trace.
    pub fn simulate_timetrace_per_particle(&mut self, photons: &PhotonConfig) -> Result<()> {
        photons.validate()?;
        if self.options.emission_mode != EmissionMode::PerParticle {
            return Err(SimulationError::Configuration(
                "per-particle timetraces need per-particle emission".to_string(),
            ));
        }
        let emission = self.completed_emission()?;
        let n_samples = emission.len();
        let rows = emission.rows();
        info!("Simulating per-particle timetraces for {} particles", rows);

        let mut params = self.options.array_params();
        params.overwrite = true;
        let mut timetrace = self
            .storage
            .create_array::<u8>(TIMETRACE_PER_PARTICLE_ARRAY, rows, params)?;
        let mut rngs = seeded_streams(self.options.seed ^ PHOTON_PARTICLE_SALT, rows);

        for range in ChunkSlices::new(n_samples, self.options.chunk_size) {
            let em = emission.read(range)?;
            let counts =
                sample_timetrace_rows(em.view(), photons, self.params.t_step, &mut rngs)?;
            timetrace.append(counts.view())?;
            timetrace.flush()?;
        }
        debug!("Per-particle timetraces stored: {} bins", timetrace.len());
        Ok(())
    }

    fn stream_row(
        &self,
        timetrace: &dyn ChunkedArray<u8>,
        row: usize,
        table: &DitherTable,
    ) -> Result<PhotonTimestamps> {
        let mut stream = TimestampStream::new(table.clone());
        for range in ChunkSlices::new(timetrace.len(), self.options.chunk_size) {
            let counts = timetrace.read_row(row, range)?;
            stream.push_chunk(counts.view())?;
        }
        Ok(stream.finish(self.params.t_step))
    }

    /// Timestamps of the total timetrace.
    pub fn timestamps_total(&self, table: &DitherTable) -> Result<PhotonTimestamps> {
        let timetrace = self.storage.open_array::<u8>(TIMETRACE_TOTAL_ARRAY)?;
        let ts = self.stream_row(timetrace.as_ref(), 0, table)?;
        info!("Generated {} timestamps", ts.len());
        Ok(ts)
    }

    /// Timestamps of every particle, in particle order.
    pub fn timestamps_per_particle(&self, table: &DitherTable) -> Result<Vec<PhotonTimestamps>> {
        let timetrace = self.storage.open_array::<u8>(TIMETRACE_PER_PARTICLE_ARRAY)?;
        (0..timetrace.rows())
            .map(|row| self.stream_row(timetrace.as_ref(), row, table))
            .collect()
    }

    /// Photon times in seconds of the total timetrace, placed with halving
    /// sub-bin fractions instead of a dither table.
    ///
    /// Reads the stored timetrace chunk by chunk. Any count per bin is
    /// supported.
    pub fn ph_times_halving(&self) -> Result<Vec<f64>> {
        let timetrace = self.storage.open_array::<u8>(TIMETRACE_TOTAL_ARRAY)?;
        let mut times = Vec::new();
        for range in ChunkSlices::new(timetrace.len(), self.options.chunk_size) {
            let first_bin = range.start;
            let counts = timetrace.read_row(0, range)?;
            extend_halving_times(&mut times, counts.view(), first_bin, self.params.t_step);
        }
        info!("Generated {} halving-fraction photon times", times.len());
        Ok(times)
    }

    /// Time axis in seconds with decimation `dec`, cached per decimation.
    ///
    /// Holds `n_samples / dec` points spaced `t_step · dec` apart.
    pub fn time(&mut self, dec: usize) -> Result<&Array1<f64>> {
        if dec == 0 {
            return Err(SimulationError::Configuration(
                "time axis decimation must be at least 1".to_string(),
            ));
        }
        let n = self.n_samples() / dec;
        let spacing = self.params.t_step * dec as f64;
        Ok(self
            .time_axes
            .entry(dec)
            .or_insert_with(|| Array1::from_shape_fn(n, |k| k as f64 * spacing)))
    }

    /// Full emission array, `rows × n_samples`.
    pub fn emission(&self) -> Result<Array2<f64>> {
        let emission = self.storage.open_array::<f64>(EMISSION_ARRAY)?;
        Ok(emission.read(0..emission.len())?)
    }

    /// Emission summed over particles.
    pub fn emission_total(&self) -> Result<Array1<f64>> {
        Ok(sum_rows(self.emission()?.view()))
    }

    /// Photon counts of the total timetrace.
    pub fn timetrace_total(&self) -> Result<Array1<u8>> {
        let timetrace = self.storage.open_array::<u8>(TIMETRACE_TOTAL_ARRAY)?;
        Ok(timetrace.read_row(0, 0..timetrace.len())?)
    }

    /// Photon counts per particle, `num_particles × n_samples`.
    pub fn timetrace_per_particle(&self) -> Result<Array2<u8>> {
        let timetrace = self.storage.open_array::<u8>(TIMETRACE_PER_PARTICLE_ARRAY)?;
        Ok(timetrace.read(0..timetrace.len())?)
    }

    /// Stored trajectory of particle `index`, `3 × n_samples`.
    ///
    /// Only available for runs with [`TrajectoryRetention::Keep`].
    pub fn positions(&self, index: usize) -> Result<Array2<f64>> {
        if self.options.retention != TrajectoryRetention::Keep {
            return Err(SimulationError::Configuration(
                "trajectories were not kept for this run".to_string(),
            ));
        }
        let positions = self.storage.open_array::<f64>(&position_array(index))?;
        Ok(positions.read(0..positions.len())?)
    }

    /// Running statistics of the total emission, computed chunk by chunk.
    pub fn emission_stats(&self) -> Result<StreamingStats> {
        let emission = self.storage.open_array::<f64>(EMISSION_ARRAY)?;
        let stats = reduce_chunks(
            emission.len(),
            self.options.chunk_size,
            |range| emission.read(range),
            |em: &Array2<f64>| {
                let mut stats = StreamingStats::new();
                stats.extend(sum_rows(em.view()).iter().copied());
                stats
            },
            |mut acc, partial| {
                acc.merge(&partial);
                acc
            },
        )?;
        Ok(stats.unwrap_or_default())
    }

    /// Emission together with the parameters that produced it.
    pub fn emission_run(&self) -> Result<EmissionRun> {
        Ok(EmissionRun {
            params: self.params,
            sim_box: self.sim_box,
            particles: self.particles.clone(),
            emission: self.emission()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psf::{ConstantPsf, GaussianPsf};
    use crate::storage::MemoryStorage;
    use crate::timestamps::halving_fraction_times;
    use crate::trajectory::within_box;
    use approx::assert_relative_eq;

    fn small_run(options: RunOptions) -> ParticlesSimulation<MemoryStorage> {
        let params = SimulationParameters::new(1e-11, 1e-6, 2e-3, 3).unwrap();
        let sim_box = SimulationBox::centered_cube(1e-6).unwrap();
        let particles = vec![
            Particle::at_origin(),
            Particle::new(2e-7, -1e-7, 0.0),
            Particle::new(-5e-7, 5e-7, 3e-7),
        ];
        let psf = GaussianPsf::new(0.2e-6, 0.6e-6).unwrap();
        ParticlesSimulation::new(
            params,
            sim_box,
            particles,
            Box::new(psf),
            MemoryStorage::new(),
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_inconsistent_particles() {
        let params = SimulationParameters::new(1e-12, 1e-6, 1e-4, 2).unwrap();
        let result = ParticlesSimulation::new(
            params,
            SimulationBox::centered_cube(1e-6).unwrap(),
            vec![Particle::at_origin()],
            Box::new(ConstantPsf(1.0)),
            MemoryStorage::new(),
            RunOptions::default(),
        );
        assert!(matches!(result, Err(SimulationError::ParameterMismatch(_))));
    }

    #[test]
    fn test_emission_is_chunk_invariant() {
        let mut reference = small_run(RunOptions {
            chunk_size: 2000,
            seed: 7,
            ..Default::default()
        });
        reference.simulate_motion_emission().unwrap();
        let expected = reference.emission().unwrap();
        assert_eq!(expected.dim(), (1, 2000));

        for chunk_size in [1, 33, 256, 1999] {
            let mut sim = small_run(RunOptions {
                chunk_size,
                seed: 7,
                ..Default::default()
            });
            sim.simulate_motion_emission().unwrap();
            assert_eq!(sim.emission().unwrap(), expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_per_particle_rows_sum_to_total() {
        let mut total = small_run(RunOptions {
            chunk_size: 300,
            seed: 3,
            ..Default::default()
        });
        total.simulate_motion_emission().unwrap();
        let mut per = small_run(RunOptions {
            chunk_size: 300,
            seed: 3,
            emission_mode: EmissionMode::PerParticle,
            ..Default::default()
        });
        per.simulate_motion_emission().unwrap();

        let rows = per.emission().unwrap();
        assert_eq!(rows.nrows(), 3);
        let summed = per.emission_total().unwrap();
        let expected = total.emission_total().unwrap();
        for (a, b) in summed.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_kept_positions_stay_in_box() {
        let mut sim = small_run(RunOptions {
            chunk_size: 512,
            retention: TrajectoryRetention::Keep,
            ..Default::default()
        });
        sim.simulate_motion_emission().unwrap();
        for i in 0..3 {
            let pos = sim.positions(i).unwrap();
            assert_eq!(pos.dim(), (3, 2000));
            assert!(within_box(pos.view(), sim.sim_box()));
        }
    }

    #[test]
    fn test_positions_unavailable_when_discarded() {
        let mut sim = small_run(RunOptions::default());
        sim.simulate_motion_emission().unwrap();
        assert!(matches!(
            sim.positions(0),
            Err(SimulationError::Configuration(_))
        ));
    }

    #[test]
    fn test_emission_stats_match_stored_trace() {
        let mut sim = small_run(RunOptions {
            chunk_size: 150,
            seed: 4,
            ..Default::default()
        });
        sim.simulate_motion_emission().unwrap();
        let total = sim.emission_total().unwrap();
        let stats = sim.emission_stats().unwrap();
        assert_eq!(stats.count(), 2000);
        let mean = total.sum() / total.len() as f64;
        assert_relative_eq!(stats.mean().unwrap(), mean, max_relative = 1e-9);
        assert!(stats.max().unwrap() <= 3.0);
    }

    #[test]
    fn test_time_axis_cache() {
        let mut sim = small_run(RunOptions::default());
        let t = sim.time(1).unwrap().clone();
        assert_eq!(t.len(), 2000);
        assert_relative_eq!(t[10], 1e-5);
        let t4 = sim.time(4).unwrap();
        assert_eq!(t4.len(), 500);
        assert_relative_eq!(t4[1], 4e-6);
        assert!(sim.time(0).is_err());
    }

    #[test]
    fn test_timetrace_requires_emission() {
        let mut sim = small_run(RunOptions::default());
        assert!(sim
            .simulate_timetrace_total(&PhotonConfig::default())
            .is_err());
    }

    #[test]
    fn test_timestamps_match_counts() {
        let mut sim = small_run(RunOptions {
            chunk_size: 128,
            seed: 21,
            ..Default::default()
        });
        sim.simulate_motion_emission().unwrap();
        let photons = PhotonConfig::new(2e5, 2e3).unwrap();
        sim.simulate_timetrace_total(&photons).unwrap();

        let counts = sim.timetrace_total().unwrap();
        let ts = sim.timestamps_total(&DitherTable::decimal()).unwrap();
        assert_eq!(ts.len(), counts.iter().map(|&c| c as usize).sum::<usize>());
        assert!(ts.ticks.windows(2).all(|w| w[0] < w[1]));
        assert_relative_eq!(ts.tick_duration, 1e-7);
    }

    #[test]
    fn test_per_particle_timetraces() {
        let mut sim = small_run(RunOptions {
            chunk_size: 500,
            emission_mode: EmissionMode::PerParticle,
            ..Default::default()
        });
        sim.simulate_motion_emission().unwrap();
        sim.simulate_timetrace_per_particle(&PhotonConfig::new(1e5, 0.0).unwrap())
            .unwrap();
        let counts = sim.timetrace_per_particle().unwrap();
        assert_eq!(counts.dim(), (3, 2000));
        let ts = sim.timestamps_per_particle(&DitherTable::decimal()).unwrap();
        assert_eq!(ts.len(), 3);
        for (row, t) in counts.rows().into_iter().zip(&ts) {
            assert_eq!(t.len(), row.iter().map(|&c| c as usize).sum::<usize>());
        }
    }

    #[test]
    fn test_total_and_particle_photon_streams_differ() {
        let params = SimulationParameters::new(1e-12, 1e-6, 2e-3, 1).unwrap();
        let mut sim = ParticlesSimulation::new(
            params,
            SimulationBox::centered_cube(1e-6).unwrap(),
            vec![Particle::at_origin()],
            Box::new(ConstantPsf(1.0)),
            MemoryStorage::new(),
            RunOptions {
                chunk_size: 700,
                seed: 12,
                emission_mode: EmissionMode::PerParticle,
                ..Default::default()
            },
        )
        .unwrap();
        sim.simulate_motion_emission().unwrap();
        let photons = PhotonConfig::new(3e5, 0.0).unwrap();
        sim.simulate_timetrace_total(&photons).unwrap();
        sim.simulate_timetrace_per_particle(&photons).unwrap();

        // A single particle has the same emission in both traces
        let total = sim.timetrace_total().unwrap();
        let per_particle = sim.timetrace_per_particle().unwrap();
        assert_eq!(total.len(), 2000);
        assert_ne!(total, per_particle.row(0));
    }

    #[test]
    fn test_resume_rejects_other_parameters() {
        let mut first = small_run(RunOptions {
            chunk_size: 500,
            seed: 2,
            ..Default::default()
        });
        first.simulate_motion_emission().unwrap();
        let expected = first.emission().unwrap();

        let params = SimulationParameters::new(5e-11, 1e-6, 2e-3, 5).unwrap();
        let mut resumed = ParticlesSimulation::new(
            params,
            SimulationBox::centered_cube(1e-6).unwrap(),
            vec![Particle::at_origin(); 5],
            Box::new(GaussianPsf::new(0.2e-6, 0.6e-6).unwrap()),
            first.into_storage(),
            RunOptions {
                chunk_size: 500,
                seed: 3,
                overwrite: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            resumed.simulate_motion_emission(),
            Err(SimulationError::ParameterMismatch(_))
        ));
        assert_eq!(resumed.emission().unwrap(), expected);
        assert_relative_eq!(
            resumed.storage().load_metadata().unwrap().params[0].value,
            1e-11
        );
    }

    #[test]
    fn test_resume_with_matching_parameters() {
        let options = RunOptions {
            chunk_size: 400,
            seed: 2,
            ..Default::default()
        };
        let mut first = small_run(options.clone());
        first.simulate_motion_emission().unwrap();
        let expected = first.emission().unwrap();
        let storage = first.into_storage();

        let mut resumed = small_run(RunOptions {
            chunk_size: 1000,
            overwrite: false,
            ..options
        });
        resumed.storage = storage;
        resumed.simulate_motion_emission().unwrap();
        assert_eq!(resumed.emission().unwrap(), expected);
    }

    #[test]
    fn test_halving_times_read_in_chunks() {
        let mut sim = small_run(RunOptions {
            chunk_size: 37,
            seed: 9,
            ..Default::default()
        });
        sim.simulate_motion_emission().unwrap();
        sim.simulate_timetrace_total(&PhotonConfig::new(3e5, 5e3).unwrap())
            .unwrap();
        let counts = sim.timetrace_total().unwrap();
        let times = sim.ph_times_halving().unwrap();
        assert!(!times.is_empty());
        assert_eq!(times, halving_fraction_times(counts.view(), 1e-6));
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_per_particle_timetrace_needs_per_particle_mode() {
        let mut sim = small_run(RunOptions::default());
        sim.simulate_motion_emission().unwrap();
        assert!(matches!(
            sim.simulate_timetrace_per_particle(&PhotonConfig::default()),
            Err(SimulationError::Configuration(_))
        ));
    }
}
