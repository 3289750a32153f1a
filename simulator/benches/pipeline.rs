use confocal_sim::emission::particle_emission;
use confocal_sim::geometry::{Particle, SimulationBox};
use confocal_sim::psf::{GaussianPsf, TabulatedPsf};
use confocal_sim::simulation::{ParticlesSimulation, RunOptions};
use confocal_sim::storage::MemoryStorage;
use confocal_sim::timestamps::{synthesize_ticks, DitherTable};
use confocal_sim::trajectory::ParticleWalker;
use confocal_sim::SimulationParameters;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array1;

fn make_box() -> SimulationBox {
    SimulationBox::new(-4e-6, 4e-6, -4e-6, 4e-6, -6e-6, 6e-6).unwrap()
}

fn bench_walker_advance(c: &mut Criterion) {
    let sim_box = make_box();
    let particle = Particle::new(1e-6, -1e-6, 2e-6);
    let sigma = (6.0f64 * 12e-12 * 0.5e-6).sqrt();

    let mut group = c.benchmark_group("walker_advance");
    for n in [1usize << 12, 1 << 16] {
        group.bench_function(format!("{n}_samples"), |b| {
            let mut walker = ParticleWalker::new(&particle, 0, sigma, 42);
            b.iter(|| walker.advance(black_box(n), &sim_box))
        });
    }
    group.finish();
}

fn bench_particle_emission(c: &mut Criterion) {
    let sim_box = make_box();
    let sigma = (6.0f64 * 12e-12 * 0.5e-6).sqrt();
    let mut walker = ParticleWalker::new(&Particle::at_origin(), 0, sigma, 1);
    let positions = walker.advance(1 << 16, &sim_box);

    let gauss = GaussianPsf::new(0.2e-6, 0.6e-6).unwrap();
    let radial: Vec<f64> = (0..200).map(|i| i as f64 * 0.02e-6).collect();
    let axial: Vec<f64> = (0..300).map(|i| i as f64 * 0.02e-6).collect();
    let tabulated = TabulatedPsf::sample(&gauss, radial, axial).unwrap();

    let mut group = c.benchmark_group("particle_emission");
    group.bench_function("gaussian_65536", |b| {
        b.iter(|| particle_emission(black_box(positions.view()), &gauss))
    });
    group.bench_function("tabulated_65536", |b| {
        b.iter(|| particle_emission(black_box(positions.view()), &tabulated))
    });
    group.finish();
}

fn bench_synthesize_ticks(c: &mut Criterion) {
    let counts: Array1<u8> = (0..1_000_000u32)
        .map(|i| match i % 97 {
            0 => 3,
            1..=5 => 1,
            _ => 0,
        })
        .collect();
    let table = DitherTable::decimal();

    c.bench_function("synthesize_ticks_1M_bins", |b| {
        b.iter(|| synthesize_ticks(black_box(counts.view()), &table))
    });
}

fn bench_full_run(c: &mut Criterion) {
    let params = SimulationParameters::new(12e-12, 0.5e-6, 0.02, 8).unwrap();
    let sim_box = make_box();

    c.bench_function("motion_emission_8p_40k_samples", |b| {
        b.iter(|| {
            let particles: Vec<Particle> = (0..8)
                .map(|i| Particle::new(i as f64 * 0.5e-6 - 2e-6, 0.0, 0.0))
                .collect();
            let mut sim = ParticlesSimulation::new(
                params,
                sim_box,
                particles,
                Box::new(GaussianPsf::new(0.2e-6, 0.6e-6).unwrap()),
                MemoryStorage::new(),
                RunOptions {
                    chunk_size: 1 << 13,
                    seed: 7,
                    ..Default::default()
                },
            )
            .unwrap();
            sim.simulate_motion_emission().unwrap();
            sim
        })
    });
}

criterion_group!(
    benches,
    bench_walker_advance,
    bench_particle_emission,
    bench_synthesize_ticks,
    bench_full_run,
);
criterion_main!(benches);
