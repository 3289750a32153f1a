//! Brownian motion photon simulator for a confocal detection volume
//!
//! Simulates particles diffusing through a box around the focal spot and
//! generates the photon timestamps a single-photon detector would record:
//!
//! 1. Particle motion and PSF-weighted emission, stored chunk by chunk
//! 2. Poisson-sampled photon counts per time step
//! 3. Integer timestamps with sub-step resolution
//!
//! Usage:
//! ```
//! cargo run --release --bin diffusion_sim -- [OPTIONS]
//! ```
//!
//! With `--engines N` the same configuration is run on N independent workers
//! and their timestamps are concatenated into one long acquisition.

use anyhow::{Context, Result};
use clap::Parser;
use confocal_sim::emission::EmissionMode;
use confocal_sim::geometry::gen_particles;
use confocal_sim::merge::merge_timestamps;
use confocal_sim::params::SimulationConfig;
use confocal_sim::psf::Psf;
use confocal_sim::shared_args::SharedSimulationArgs;
use confocal_sim::simulation::{ParticlesSimulation, RunOptions};
use confocal_sim::storage::FileStorage;
use confocal_sim::timestamps::DitherTable;
use confocal_sim::worker::{parallel_gen_timestamps, RequestedOutput, WorkerRequest};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Command line arguments for the diffusion simulator
#[derive(Parser, Debug)]
#[command(
    name = "Diffusion Simulator",
    about = "Simulates diffusing particles in a confocal volume and their photon timestamps",
    long_about = None
)]
struct Args {
    #[command(flatten)]
    shared: SharedSimulationArgs,

    /// JSON configuration file, replaces the simulation options above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for run data, records and timestamps
    #[arg(long, default_value = "sim_output")]
    output_dir: PathBuf,

    /// Prefix of run record file names
    #[arg(long, default_value = "bromo_sim")]
    prefix: String,

    /// Number of independent runs to simulate and concatenate
    #[arg(long, default_value_t = 1)]
    engines: usize,

    /// Continue an interrupted run found in the output directory
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Also write float photon times placed with halving sub-bin fractions
    #[arg(long, default_value_t = false)]
    halving_times: bool,
}

fn write_binary<T: bytemuck::Pod>(path: &Path, values: &[T]) -> Result<()> {
    std::fs::write(path, bytemuck::cast_slice(values))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} values to {}", values.len(), path.display());
    Ok(())
}

fn run_single(config: &SimulationConfig, psf: Box<dyn Psf>, args: &Args) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let particles = gen_particles(config.params.num_particles, &config.sim_box, &mut rng);

    let run_dir = args
        .output_dir
        .join(config.params.compact_name(&config.sim_box));
    let storage = FileStorage::create(&run_dir)
        .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;

    let options = RunOptions {
        emission_mode: config.emission_mode,
        retention: config.retention,
        chunk_size: config.chunk_size,
        seed: config.seed,
        overwrite: !args.resume,
    };
    let mut sim = ParticlesSimulation::new(
        config.params,
        config.sim_box,
        particles,
        psf,
        storage,
        options,
    )?;

    let start = Instant::now();
    sim.simulate_motion_emission()?;
    info!(
        "Motion and emission took {:.1}s",
        start.elapsed().as_secs_f64()
    );
    let stats = sim.emission_stats()?;
    debug!(
        "Emission mean {:?}, max {:?} over {} samples",
        stats.mean(),
        stats.max(),
        stats.count()
    );

    sim.simulate_timetrace_total(&config.photons)?;
    let table = DitherTable::decimal();
    let timestamps = sim.timestamps_total(&table)?;
    info!(
        "{} photons, {:.1} cps average",
        timestamps.len(),
        timestamps.len() as f64 / config.params.t_max
    );
    write_binary(&run_dir.join("timestamps.bin"), &timestamps.ticks)?;
    if args.halving_times {
        let times = sim.ph_times_halving()?;
        write_binary(&run_dir.join("timestamps_halving.bin"), &times)?;
    }

    if config.emission_mode == EmissionMode::PerParticle {
        sim.simulate_timetrace_per_particle(&config.photons)?;
        let per_particle = sim.timestamps_per_particle(&table)?;
        let ticks: Vec<&[i64]> = per_particle.iter().map(|t| t.ticks.as_slice()).collect();
        let (merged, labels) = merge_timestamps(&ticks)?;
        write_binary(&run_dir.join("timestamps_particles.bin"), &merged)?;
        write_binary(&run_dir.join("timestamps_particle_index.bin"), &labels)?;
    }

    let record_path = sim.record().save_in_dir(&args.output_dir, &args.prefix)?;
    info!("Run record: {}", record_path.display());
    Ok(())
}

fn run_engines(config: &SimulationConfig, psf: Box<dyn Psf>, args: &Args) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let request = WorkerRequest {
        params: config.params,
        sim_box: config.sim_box,
        particles: gen_particles(config.params.num_particles, &config.sim_box, &mut rng),
        options: RunOptions {
            emission_mode: config.emission_mode,
            retention: config.retention,
            chunk_size: config.chunk_size,
            seed: config.seed,
            overwrite: true,
        },
        photons: config.photons,
        output: RequestedOutput::Timestamps,
    };

    let start = Instant::now();
    let merged = parallel_gen_timestamps(request.for_engines(args.engines), Arc::from(psf))?;
    info!(
        "{} engines simulated {:.2}s in {:.1}s",
        args.engines,
        merged.total_duration,
        start.elapsed().as_secs_f64()
    );

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    let path = args
        .output_dir
        .join(format!("{}_{}engines_times.bin", merged.name, args.engines));
    write_binary(&path, &merged.times)
}

fn main() -> Result<()> {
    // Initialize logging from environment variables
    env_logger::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimulationConfig::load_from_file(path)?,
        None => args.shared.to_config()?,
    };
    if args.shared.debug {
        debug!("Configuration: {:#?}", config);
    }
    let psf = config.psf.build()?;
    info!("Using PSF model '{}'", psf.name());

    if args.engines > 1 {
        run_engines(&config, psf, &args)
    } else {
        run_single(&config, psf, &args)
    }
}
