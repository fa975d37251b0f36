//! Path simulation contract and reference engines
//!
//! The pricing engine never simulates anything itself: it asks a
//! [`SimulationEngine`] for a per-path handle and then repeatedly asks it to
//! evolve a [`MarketEnvironment`] to the next event date. Two reference
//! engines are provided:
//!
//! - [`GaussianShortRateEngine`]: Hull-White style one-factor short rate with
//!   an optional lognormal FX factor, drawn from a seeded random stream
//! - [`ScenarioReplayEngine`]: replays pre-generated scenario paths

mod gaussian;
mod replay;

pub use gaussian::{FxFactor, GaussianPath, GaussianShortRateEngine};
pub use replay::{ReplayHandle, ReplayPath, ScenarioReplayEngine};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LsmError, LsmResult};
use crate::market::MarketEnvironment;

/// Position of an event date on the simulation grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridIndex {
    /// The date is the grid point at this index
    Exact(usize),
    /// The date falls before the grid point at this insertion index and
    /// must be interpolated
    Between(usize),
}

impl GridIndex {
    /// Locate a date on a sorted grid
    pub fn locate(grid: &[NaiveDate], date: NaiveDate) -> Self {
        match grid.binary_search(&date) {
            Ok(i) => GridIndex::Exact(i),
            Err(i) => GridIndex::Between(i),
        }
    }

    /// Signed encoding: the index itself, or the bitwise complement of the
    /// insertion point
    pub fn raw(self) -> isize {
        match self {
            GridIndex::Exact(i) => i as isize,
            GridIndex::Between(i) => !(i as isize),
        }
    }

    /// Inverse of [`GridIndex::raw`]
    pub fn from_raw(raw: isize) -> Self {
        if raw >= 0 {
            GridIndex::Exact(raw as usize)
        } else {
            GridIndex::Between(!raw as usize)
        }
    }

    pub fn needs_interpolation(self) -> bool {
        matches!(self, GridIndex::Between(_))
    }
}

/// Simulation collaborator driving the forward pass
///
/// `evolve` must mutate curves, FX and credit state of `env` in place and be
/// idempotent when called again for the same date.
pub trait SimulationEngine: Send + Sync {
    /// Per-path handle (random stream state or replayed path)
    type Path: Send;

    /// Valuation date of the simulation
    fn as_of(&self) -> NaiveDate;

    /// Sorted simulation grid, starting at `as_of`
    fn simulation_dates(&self) -> &[NaiveDate];

    /// Number of paths the engine produces
    fn path_count(&self) -> usize;

    /// Produce the handle for one path
    fn path(&self, index: usize) -> LsmResult<Self::Path>;

    /// Evolve the environment to `date`
    fn evolve(
        &self,
        path: &mut Self::Path,
        grid: GridIndex,
        time: f64,
        date: NaiveDate,
        env: &mut MarketEnvironment,
    ) -> LsmResult<()>;
}

/// Validate and normalise a simulation grid so it starts at `as_of`
pub(crate) fn normalise_grid(as_of: NaiveDate, mut dates: Vec<NaiveDate>) -> LsmResult<Vec<NaiveDate>> {
    dates.retain(|d| *d >= as_of);
    dates.sort();
    dates.dedup();
    if dates.first() != Some(&as_of) {
        dates.insert(0, as_of);
    }
    if dates.len() < 2 {
        return Err(LsmError::invalid_input(
            "simulation grid needs at least one date after the valuation date",
        ));
    }
    Ok(dates)
}

/// Interpolation weights `(lower, upper, weight_on_upper)` for a grid index
pub(crate) fn bracket(times: &[f64], grid: GridIndex, time: f64) -> (usize, usize, f64) {
    let last = times.len() - 1;
    match grid {
        GridIndex::Exact(i) => {
            let i = i.min(last);
            (i, i, 0.0)
        }
        GridIndex::Between(0) => (0, 0, 0.0),
        GridIndex::Between(i) if i > last => (last, last, 0.0),
        GridIndex::Between(i) => {
            let (t0, t1) = (times[i - 1], times[i]);
            let w = if t1 > t0 { ((time - t0) / (t1 - t0)).clamp(0.0, 1.0) } else { 0.0 };
            (i - 1, i, w)
        }
    }
}
