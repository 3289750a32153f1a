//! Photon timestamps from binned photon counts.
//!
//! A bin holding `c` photons yields `c` timestamps inside that bin. Time is
//! expressed in integer ticks, `scale` ticks per bin, and the photons of one bin
//! are spread over distinct fractional offsets taken from a [`DitherTable`]:
//!
//! ```text
//! tick = bin · scale + offset(v)      for v = 1..=count[bin]
//! ```
//!
//! with `offset(1) = 0`. Offsets are distinct and lie in `[0, scale)`, so the
//! resulting ticks are strictly increasing across the whole trace.

use crate::errors::{Result, SimulationError};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Sub-bin offsets used to spread multiple photons of one bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DitherTable {
    scale: i64,
    /// Offsets for levels 2, 3, ...; level 1 always sits at offset 0
    offsets: Vec<i64>,
    /// `sorted[c]` holds the offsets of a bin with `c` photons, ascending
    sorted: Vec<Vec<i64>>,
}

const DECIMAL_OFFSETS: [i64; 8] = [5, 2, 8, 4, 9, 1, 7, 3];

impl DitherTable {
    /// Ten ticks per bin, up to nine photons per bin.
    pub fn decimal() -> Self {
        Self::build(10, DECIMAL_OFFSETS.to_vec())
    }

    /// Table with `max_count + 1` ticks per bin supporting up to `max_count`
    /// photons per bin.
    ///
    /// Offsets visit `1..=max_count` with a fixed stride coprime with the
    /// scale, so consecutive levels land far apart inside the bin.
    pub fn for_max_count(max_count: u8) -> Result<Self> {
        if max_count == 0 {
            return Err(SimulationError::Configuration(
                "dither table needs a maximum count of at least 1".to_string(),
            ));
        }
        let scale = i64::from(max_count) + 1;
        let stride = (1..=scale / 2)
            .rev()
            .find(|&s| gcd(s, scale) == 1)
            .unwrap_or(1);
        let offsets = (1..i64::from(max_count))
            .map(|k| (k * stride) % scale)
            .collect();
        Ok(Self::build(scale, offsets))
    }

    fn build(scale: i64, offsets: Vec<i64>) -> Self {
        let mut sorted = Vec::with_capacity(offsets.len() + 2);
        sorted.push(Vec::new());
        let mut level = vec![0];
        sorted.push(level.clone());
        for &offset in &offsets {
            level.push(offset);
            level.sort_unstable();
            sorted.push(level.clone());
        }
        Self {
            scale,
            offsets,
            sorted,
        }
    }

    /// Ticks per bin.
    pub fn scale(&self) -> i64 {
        self.scale
    }

    /// Largest photon count per bin this table can spread.
    pub fn max_count(&self) -> u32 {
        self.offsets.len() as u32 + 1
    }

    /// Offset of the `level`-th photon of a bin (1-based), if supported.
    pub fn offset(&self, level: u32) -> Option<i64> {
        match level {
            0 => None,
            1 => Some(0),
            v => self.offsets.get(v as usize - 2).copied(),
        }
    }

    /// Duration of one tick for a bin width of `t_step` seconds.
    pub fn tick_duration(&self, t_step: f64) -> f64 {
        t_step / self.scale as f64
    }

    fn bin_offsets(&self, bin: u64, count: u8) -> Result<&[i64]> {
        self.sorted
            .get(count as usize)
            .map(Vec::as_slice)
            .ok_or(SimulationError::PrecisionOverflow {
                bin: bin as usize,
                count: u32::from(count),
                max: self.max_count(),
            })
    }
}

impl Default for DitherTable {
    fn default() -> Self {
        Self::decimal()
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn push_ticks(
    counts: ArrayView1<'_, u8>,
    first_bin: u64,
    table: &DitherTable,
    out: &mut Vec<i64>,
) -> Result<()> {
    for (i, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let bin = first_bin + i as u64;
        let base = bin as i64 * table.scale;
        out.extend(table.bin_offsets(bin, count)?.iter().map(|o| base + o));
    }
    Ok(())
}

/// Integer ticks of every photon in `counts`, ascending.
///
/// Returns [`SimulationError::PrecisionOverflow`] if a bin holds more photons
/// than `table` can spread.
pub fn synthesize_ticks(counts: ArrayView1<'_, u8>, table: &DitherTable) -> Result<Vec<i64>> {
    let total: usize = counts.iter().map(|&c| c as usize).sum();
    let mut ticks = Vec::with_capacity(total);
    push_ticks(counts, 0, table, &mut ticks)?;
    Ok(ticks)
}

/// Photon arrival times in integer ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotonTimestamps {
    pub ticks: Vec<i64>,
    /// Seconds per tick
    pub tick_duration: f64,
}

impl PhotonTimestamps {
    pub fn new(ticks: Vec<i64>, tick_duration: f64) -> Self {
        Self {
            ticks,
            tick_duration,
        }
    }

    /// Arrival times in seconds.
    pub fn seconds(&self) -> Vec<f64> {
        self.ticks
            .iter()
            .map(|&t| t as f64 * self.tick_duration)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

/// Timestamp synthesis over a timetrace delivered chunk by chunk.
///
/// Tracks the global index of the next bin so ticks of a later chunk always
/// follow those of earlier chunks.
#[derive(Debug, Clone)]
pub struct TimestampStream {
    table: DitherTable,
    next_bin: u64,
    ticks: Vec<i64>,
}

impl TimestampStream {
    pub fn new(table: DitherTable) -> Self {
        Self {
            table,
            next_bin: 0,
            ticks: Vec::new(),
        }
    }

    /// Append the photons of the next chunk of bins.
    ///
    /// On error nothing is appended and the bin position is left unchanged.
    pub fn push_chunk(&mut self, counts: ArrayView1<'_, u8>) -> Result<()> {
        let mark = self.ticks.len();
        if let Err(e) = push_ticks(counts, self.next_bin, &self.table, &mut self.ticks) {
            self.ticks.truncate(mark);
            return Err(e);
        }
        self.next_bin += counts.len() as u64;
        Ok(())
    }

    /// Bins consumed so far.
    pub fn bins_seen(&self) -> u64 {
        self.next_bin
    }

    pub fn finish(self, t_step: f64) -> PhotonTimestamps {
        let tick_duration = self.table.tick_duration(t_step);
        PhotonTimestamps::new(self.ticks, tick_duration)
    }
}

/// Photon times in seconds using halving sub-bin fractions.
///
/// The `v`-th photon of a bin is placed at `(bin + f_v) · t_step` with
/// `f_1 = 0`, `f_2 = 1/2`, `f_3 = 1/4` and so on. Unlike the tick tables there
/// is no upper limit on the count per bin, at the cost of float timestamps.
pub fn halving_fraction_times(counts: ArrayView1<'_, u8>, t_step: f64) -> Vec<f64> {
    let mut times = Vec::with_capacity(counts.iter().map(|&c| c as usize).sum());
    extend_halving_times(&mut times, counts, 0, t_step);
    times
}

/// Append the halving-fraction times of `counts`, whose first bin is
/// `first_bin` of the whole trace.
pub fn extend_halving_times(
    times: &mut Vec<f64>,
    counts: ArrayView1<'_, u8>,
    first_bin: usize,
    t_step: f64,
) {
    for (k, &count) in counts.iter().enumerate() {
        let bin = (first_bin + k) as f64;
        let start = times.len();
        let mut fraction = 0.5;
        for v in 1..=count {
            let offset = if v == 1 { 0.0 } else { fraction };
            if v > 1 {
                fraction /= 2.0;
            }
            times.push((bin + offset) * t_step);
        }
        times[start..].sort_by(f64::total_cmp);
    }
}
