//! Merging timestamps and emission traces across runs and channels.

use crate::errors::{Result, SimulationError};
use crate::geometry::{Particle, SimulationBox};
use crate::params::SimulationParameters;
use ndarray::Array2;

/// Stable argsort by a total order key.
fn argsort_by<T, F>(values: &[T], mut cmp: F) -> Vec<usize>
where
    F: FnMut(&T, &T) -> std::cmp::Ordering,
{
    let mut index: Vec<usize> = (0..values.len()).collect();
    index.sort_by(|&a, &b| cmp(&values[a], &values[b]));
    index
}

/// Join consecutive timestamp blocks into one sequence.
///
/// Block `i` is shifted by `i · time_block` seconds; the result is sorted.
pub fn merge_ph_times<T: AsRef<[f64]>>(ph_times_list: &[T], time_block: f64) -> Vec<f64> {
    let total = ph_times_list.iter().map(|ph| ph.as_ref().len()).sum();
    let mut merged = Vec::with_capacity(total);
    for (i, ph) in ph_times_list.iter().enumerate() {
        let offset = i as f64 * time_block;
        merged.extend(ph.as_ref().iter().map(|t| t + offset));
    }
    merged.sort_by(f64::total_cmp);
    merged
}

/// Merge donor and acceptor timestamps.
///
/// Returns the sorted times and, in the same order, `true` for photons coming
/// from the acceptor channel. Donor photons precede acceptor photons with an
/// identical time.
pub fn merge_da_ph_times(ph_times_d: &[f64], ph_times_a: &[f64]) -> (Vec<f64>, Vec<bool>) {
    let times: Vec<f64> = ph_times_d.iter().chain(ph_times_a).copied().collect();
    let order = argsort_by(&times, f64::total_cmp);
    let merged = order.iter().map(|&i| times[i]).collect();
    let a_em = order.iter().map(|&i| i >= ph_times_d.len()).collect();
    (merged, a_em)
}

/// Merge integer timestamps from several sources.
///
/// Returns the sorted ticks and the index of the source of each tick. Ties
/// keep the order of the sources.
pub fn merge_timestamps<T: AsRef<[i64]>>(timestamps_list: &[T]) -> Result<(Vec<i64>, Vec<u16>)> {
    if timestamps_list.len() > usize::from(u16::MAX) + 1 {
        return Err(SimulationError::Configuration(format!(
            "cannot label {} timestamp sources with 16-bit indices",
            timestamps_list.len()
        )));
    }
    let mut ticks = Vec::new();
    let mut labels = Vec::new();
    for (source, ts) in timestamps_list.iter().enumerate() {
        ticks.extend_from_slice(ts.as_ref());
        labels.extend(std::iter::repeat(source as u16).take(ts.as_ref().len()));
    }
    let order = argsort_by(&ticks, Ord::cmp);
    let merged = order.iter().map(|&i| ticks[i]).collect();
    let source = order.iter().map(|&i| labels[i]).collect();
    Ok((merged, source))
}

/// Emission trace of a finished run together with what produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionRun {
    pub params: SimulationParameters,
    pub sim_box: SimulationBox,
    pub particles: Vec<Particle>,
    pub emission: Array2<f64>,
}

/// Sum the emission of independent runs into a single run.
///
/// All runs must share the time base, box and emission shape. The merged run
/// holds the concatenated particle list and takes its identifiers from the
/// first run.
pub fn merge_particle_emission(runs: &[EmissionRun]) -> Result<EmissionRun> {
    let first = runs.first().ok_or_else(|| {
        SimulationError::ParameterMismatch("no runs to merge".to_string())
    })?;
    let mut emission = Array2::<f64>::zeros(first.emission.raw_dim());
    let mut particles = Vec::new();

    for (i, run) in runs.iter().enumerate() {
        let p = &run.params;
        let same_time_base = p.diffusion == first.params.diffusion
            && p.t_step == first.params.t_step
            && p.t_max == first.params.t_max;
        if !same_time_base || run.sim_box != first.sim_box {
            return Err(SimulationError::ParameterMismatch(format!(
                "run {i} has different parameters or box than run 0"
            )));
        }
        if run.emission.dim() != first.emission.dim() {
            return Err(SimulationError::ParameterMismatch(format!(
                "run {i} emission shape {:?} differs from {:?}",
                run.emission.dim(),
                first.emission.dim()
            )));
        }
        emission += &run.emission;
        particles.extend_from_slice(&run.particles);
    }

    let mut params = first.params;
    params.num_particles = particles.len();
    Ok(EmissionRun {
        params,
        sim_box: first.sim_box,
        particles,
        emission,
    })
}
