use anyhow::{bail, Result};

use crate::arg::Arg;
use crate::error::InvariantError;
use crate::utils::binsearch;

/// Returns the `i`-th discretized age of a log-spaced grid with `ntimes`
/// intervals ending at `maxtime`.
pub fn time_point(i: usize, ntimes: usize, maxtime: f64, delta: f64) -> f64 {
    ((i as f64 / ntimes as f64 * (1.0 + delta * maxtime).ln()).exp() - 1.0) / delta
}

/// Returns `ntimes` log-spaced ages from 0 to `maxtime`.
pub fn time_points(ntimes: usize, maxtime: f64, delta: f64) -> Vec<f64> {
    (0..ntimes)
        .map(|i| time_point(i, ntimes - 1, maxtime, delta))
        .collect()
}

/// Model parameters and the time discretization scheme.
///
/// `times` is strictly increasing with `times[0] == 0`; index `ntimes-1`
/// is the basal "root" time. `time_steps[i] = times[i+1] - times[i]` with
/// an infinite top entry, so hazard sums over the final interval absorb
/// all remaining probability mass.
#[derive(Debug, Clone)]
pub struct ArgModel {
    pub ntimes: usize,
    pub maxtime: f64,
    pub delta: f64,
    pub times: Vec<f64>,
    pub time_steps: Vec<f64>,
    pub popsizes: Vec<f64>,
    pub rho: f64,
    pub mu: f64,
}

impl ArgModel {
    /// Log-spaced grid with a constant population size.
    pub fn new_log(
        ntimes: usize,
        maxtime: f64,
        delta: f64,
        popsize: f64,
        rho: f64,
        mu: f64,
    ) -> Result<Self> {
        Self::with_popsizes(ntimes, maxtime, delta, vec![popsize; ntimes], rho, mu)
    }

    /// Log-spaced grid with per-time-point population sizes.
    pub fn with_popsizes(
        ntimes: usize,
        maxtime: f64,
        delta: f64,
        popsizes: Vec<f64>,
        rho: f64,
        mu: f64,
    ) -> Result<Self> {
        if ntimes < 2 {
            bail!("ntimes must be >= 2, got {ntimes}");
        }
        if maxtime <= 0.0 || delta <= 0.0 {
            bail!("maxtime and delta must be positive");
        }
        if popsizes.len() != ntimes {
            bail!(
                "popsizes length {} does not match ntimes {}",
                popsizes.len(),
                ntimes
            );
        }
        if popsizes.iter().any(|&n| n <= 0.0) {
            bail!("population sizes must be positive");
        }

        let times = time_points(ntimes, maxtime, delta);
        let mut time_steps: Vec<f64> = (0..ntimes - 1).map(|i| times[i + 1] - times[i]).collect();
        time_steps.push(f64::INFINITY);

        Ok(ArgModel {
            ntimes,
            maxtime,
            delta,
            times,
            time_steps,
            popsizes,
            rho,
            mu,
        })
    }

    /// Doubled-resolution grid whose even indices coincide exactly with
    /// the coarse grid points and whose odd indices are the rounding
    /// boundaries used by [`discretize_arg`].
    pub fn fine_times(&self) -> Vec<f64> {
        time_points(2 * self.ntimes - 1, self.maxtime, self.delta)
    }

    /// Index of a grid-aligned age. Ages written by [`discretize_arg`]
    /// are exact copies of grid entries; the tolerance only guards values
    /// that round-tripped through a text format.
    pub fn time_index(&self, age: f64) -> Result<usize> {
        time_index_in(&self.times, age)
    }
}

pub(crate) fn time_index_in(times: &[f64], age: f64) -> Result<usize> {
    for (i, &t) in times.iter().enumerate() {
        if (t - age).abs() <= 1e-9 * t.abs().max(1.0) {
            return Ok(i);
        }
    }
    Err(InvariantError::OffGridAge { age }.into())
}

/// Round every node age onto the coarse grid embedded in `times2` (see
/// [`ArgModel::fine_times`]) and force recombination positions to a
/// strictly increasing integer sequence.
///
/// This is the one documented in-place mutation of an ARG. Ages above the
/// grid are clamped to the top point. A recombination position collision
/// surviving the dedup pass signals an upstream ARG defect and is fatal.
pub fn discretize_arg(arg: &mut Arg, times2: &[f64]) -> Result<()> {
    let ids: Vec<_> = arg.node_ids().collect();
    for id in ids.iter().copied() {
        let age = arg.node(id).age;
        let (lo, hi) = binsearch(times2, age);
        let rounded = match (lo, hi) {
            (_, None) => times2[times2.len() - 1],
            (Some(i), Some(_)) => {
                if i % 2 == 0 {
                    times2[i]
                } else {
                    times2[i + 1]
                }
            }
            (None, Some(_)) => bail!("negative node age {age}"),
        };
        arg.node_mut(id).age = rounded;
    }

    // Force recomb positions to unique integers, in genomic order.
    let mut recombs: Vec<_> = arg.recomb_ids().collect();
    recombs.sort_by(|&a, &b| {
        arg.node(a)
            .pos
            .partial_cmp(&arg.node(b).pos)
            .expect("non-finite recomb position")
    });
    let mut last = 0i64;
    for id in recombs {
        let intpos = arg.node(id).pos.trunc() as i64;
        let pos = if intpos > last { intpos } else { last + 1 };
        arg.node_mut(id).pos = pos as f64;
        last = pos;
    }

    let mut seen = std::collections::HashSet::new();
    for id in arg.recomb_ids() {
        let pos = arg.node(id).pos as i64;
        if !seen.insert(pos) {
            return Err(InvariantError::DuplicateRecombPos { pos }.into());
        }
    }
    Ok(())
}
