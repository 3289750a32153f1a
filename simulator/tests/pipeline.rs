//! End-to-end runs of the motion → emission → timetrace → timestamp pipeline

use confocal_sim::simulation::EMISSION_ARRAY;
use confocal_sim::storage::{ArrayParams, Storage};
use confocal_sim::trajectory::within_box;
use confocal_sim::{
    ConstantPsf, DitherTable, EmissionMode, FileStorage, GaussianPsf, MemoryStorage, Particle,
    ParticlesSimulation, PhotonConfig, RunOptions, SimulationBox, SimulationError,
    SimulationParameters, TrajectoryRetention,
};
use ndarray::s;

fn diffusion_run<S: Storage>(storage: S, options: RunOptions) -> ParticlesSimulation<S> {
    let params = SimulationParameters::new(12e-12, 0.5e-6, 3e-3, 4).unwrap();
    let sim_box = SimulationBox::new(-2e-6, 2e-6, -2e-6, 2e-6, -3e-6, 3e-6).unwrap();
    let particles = vec![
        Particle::at_origin(),
        Particle::new(1e-6, 0.0, -1e-6),
        Particle::new(-1.5e-6, 1.5e-6, 2e-6),
        Particle::new(0.1e-6, -0.2e-6, 0.3e-6),
    ];
    ParticlesSimulation::new(
        params,
        sim_box,
        particles,
        Box::new(GaussianPsf::new(0.2e-6, 0.6e-6).unwrap()),
        storage,
        options,
    )
    .unwrap()
}

#[test]
fn test_single_particle_constant_psf() {
    let params = SimulationParameters::new(1e-12, 1e-6, 1e-4, 1).unwrap();
    let sim_box = SimulationBox::centered_cube(1e-6).unwrap();
    let mut sim = ParticlesSimulation::new(
        params,
        sim_box,
        vec![Particle::at_origin()],
        Box::new(ConstantPsf(1.0)),
        MemoryStorage::new(),
        RunOptions {
            retention: TrajectoryRetention::Keep,
            chunk_size: 32,
            seed: 2024,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(sim.n_samples(), 100);

    sim.simulate_motion_emission().unwrap();
    let positions = sim.positions(0).unwrap();
    assert_eq!(positions.dim(), (3, 100));
    assert!(within_box(positions.view(), &sim_box));

    let emission = sim.emission_total().unwrap();
    assert_eq!(emission.len(), 100);
    assert!(emission.iter().all(|&e| e == 1.0));

    sim.simulate_timetrace_total(&PhotonConfig::new(1.0, 0.0).unwrap())
        .unwrap();
    let counts = sim.timetrace_total().unwrap();
    assert_eq!(counts.len(), 100);
    // One expected photon per million bins
    assert!(counts.iter().all(|&c| c == 0));
    assert!(sim
        .timestamps_total(&DitherTable::decimal())
        .unwrap()
        .is_empty());
}

#[test]
fn test_pipeline_independent_of_chunk_size() {
    let photons = PhotonConfig::new(3e5, 2e3).unwrap();
    let run = |chunk_size: usize| {
        let mut sim = diffusion_run(
            MemoryStorage::new(),
            RunOptions {
                chunk_size,
                seed: 99,
                ..Default::default()
            },
        );
        sim.simulate_motion_emission().unwrap();
        sim.simulate_timetrace_total(&photons).unwrap();
        (
            sim.emission().unwrap(),
            sim.timetrace_total().unwrap(),
            sim.timestamps_total(&DitherTable::decimal()).unwrap(),
        )
    };

    let (em_ref, tt_ref, ts_ref) = run(6000);
    assert_eq!(em_ref.dim(), (1, 6000));
    assert!(!ts_ref.is_empty());
    assert!(ts_ref.ticks.windows(2).all(|w| w[0] < w[1]));

    for chunk_size in [1000, 777, 64] {
        let (em, tt, ts) = run(chunk_size);
        assert_eq!(em, em_ref, "emission, chunk size {chunk_size}");
        assert_eq!(tt, tt_ref, "timetrace, chunk size {chunk_size}");
        assert_eq!(ts, ts_ref, "timestamps, chunk size {chunk_size}");
    }
}

#[test]
fn test_interrupted_run_resumes_to_same_result() {
    let dir = tempfile::tempdir().unwrap();
    let options = RunOptions {
        chunk_size: 500,
        seed: 11,
        emission_mode: EmissionMode::PerParticle,
        ..Default::default()
    };

    let mut reference = diffusion_run(
        FileStorage::create(dir.path().join("reference")).unwrap(),
        options.clone(),
    );
    reference.simulate_motion_emission().unwrap();
    let expected = reference.emission().unwrap();

    // Leave a partial run behind: 2000 flushed samples and 250 unflushed ones
    let partial_dir = dir.path().join("partial");
    {
        let mut storage = FileStorage::create(&partial_dir).unwrap();
        let mut emission = storage
            .create_array::<f64>(EMISSION_ARRAY, 4, ArrayParams::new(500))
            .unwrap();
        emission
            .append(expected.slice(s![.., ..2000]))
            .unwrap();
        emission.flush().unwrap();
        emission
            .append(expected.slice(s![.., 2000..2250]).mapv(|v| v + 1.0).view())
            .unwrap();
    }

    let mut resumed = diffusion_run(
        FileStorage::open(&partial_dir).unwrap(),
        RunOptions {
            overwrite: false,
            ..options
        },
    );
    resumed.simulate_motion_emission().unwrap();
    assert_eq!(resumed.emission().unwrap(), expected);
}

#[test]
fn test_overwrite_discards_previous_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run");
    let options = RunOptions {
        chunk_size: 1000,
        seed: 5,
        ..Default::default()
    };

    let mut first = diffusion_run(FileStorage::create(&path).unwrap(), options.clone());
    first.simulate_motion_emission().unwrap();
    let expected = first.emission().unwrap();

    let mut second = diffusion_run(
        FileStorage::open(&path).unwrap(),
        RunOptions {
            seed: 6,
            ..options.clone()
        },
    );
    second.simulate_motion_emission().unwrap();
    assert_ne!(second.emission().unwrap(), expected);

    // The stored run now belongs to seed 6 and cannot be continued with seed 5
    let mut stale = diffusion_run(
        FileStorage::open(&path).unwrap(),
        RunOptions {
            overwrite: false,
            ..options.clone()
        },
    );
    assert!(matches!(
        stale.simulate_motion_emission(),
        Err(SimulationError::ParameterMismatch(_))
    ));

    // Resuming a complete run leaves it untouched
    let mut third = diffusion_run(
        FileStorage::open(&path).unwrap(),
        RunOptions {
            overwrite: false,
            seed: 6,
            ..options
        },
    );
    let before = third.emission().unwrap();
    third.simulate_motion_emission().unwrap();
    assert_eq!(third.emission().unwrap(), before);
}

#[test]
fn test_file_and_memory_storage_agree() {
    let dir = tempfile::tempdir().unwrap();
    let options = RunOptions {
        chunk_size: 1024,
        seed: 8,
        retention: TrajectoryRetention::Keep,
        ..Default::default()
    };
    let mut in_memory = diffusion_run(MemoryStorage::new(), options.clone());
    let mut on_disk = diffusion_run(FileStorage::create(dir.path()).unwrap(), options);
    in_memory.simulate_motion_emission().unwrap();
    on_disk.simulate_motion_emission().unwrap();

    assert_eq!(in_memory.emission().unwrap(), on_disk.emission().unwrap());
    for i in 0..4 {
        assert_eq!(in_memory.positions(i).unwrap(), on_disk.positions(i).unwrap());
    }
    let metadata = on_disk.storage().load_metadata().unwrap();
    assert_eq!(metadata.params.len(), 7);
    assert_eq!(metadata.params[0].name, "D");
    assert_eq!(metadata.seed, 8);
    assert_eq!(metadata, in_memory.storage().load_metadata().unwrap());
}
