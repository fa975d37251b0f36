//! Replay of pre-generated scenario paths
//!
//! Each path carries a rate shift and an FX multiplier per grid date. Both are
//! held piecewise constant (left value) between grid points; the shift moves
//! every yield curve in parallel and the deflator integrates it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::year_fraction;
use crate::error::{LsmError, LsmResult};
use crate::market::{Currency, CurveState, FactorLoading, MarketEnvironment};

use super::{normalise_grid, GridIndex, SimulationEngine};

/// One cached scenario path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayPath {
    /// Parallel rate shift per simulation date
    pub rate_shifts: Vec<f64>,

    /// Multiplier on the initial FX quote per simulation date (empty for none)
    #[serde(default)]
    pub fx_multipliers: Vec<f64>,
}

impl ReplayPath {
    /// Path with the same rate shift on every grid date
    pub fn constant(shift: f64, grid_len: usize) -> Self {
        Self {
            rate_shifts: vec![shift; grid_len],
            fx_multipliers: Vec::new(),
        }
    }
}

/// Per-path handle: the replayed path and the FX spot captured on first use
#[derive(Debug, Clone)]
pub struct ReplayHandle {
    path: ReplayPath,
    fx_spot: Option<f64>,
}

/// Engine replaying cached paths
#[derive(Debug, Clone)]
pub struct ScenarioReplayEngine {
    as_of: NaiveDate,
    dates: Vec<NaiveDate>,
    times: Vec<f64>,
    paths: Vec<ReplayPath>,
    fx_pair: Option<(Currency, Currency)>,
}

impl ScenarioReplayEngine {
    /// Create a replay engine; every path must have one value per grid date
    pub fn new(as_of: NaiveDate, dates: Vec<NaiveDate>, paths: Vec<ReplayPath>) -> LsmResult<Self> {
        let dates = normalise_grid(as_of, dates)?;
        for (i, path) in paths.iter().enumerate() {
            if path.rate_shifts.len() != dates.len() {
                return Err(LsmError::invalid_input(format!(
                    "path {} has {} rate shifts for {} simulation dates",
                    i,
                    path.rate_shifts.len(),
                    dates.len()
                )));
            }
            if !path.fx_multipliers.is_empty() && path.fx_multipliers.len() != dates.len() {
                return Err(LsmError::invalid_input(format!(
                    "path {} has {} FX multipliers for {} simulation dates",
                    i,
                    path.fx_multipliers.len(),
                    dates.len()
                )));
            }
        }
        let times = dates.iter().map(|d| year_fraction(as_of, *d)).collect();

        Ok(Self {
            as_of,
            dates,
            times,
            paths,
            fx_pair: None,
        })
    }

    /// Convenience constructor: one path per constant shift
    pub fn constant_shifts(as_of: NaiveDate, dates: Vec<NaiveDate>, shifts: &[f64]) -> LsmResult<Self> {
        let grid_len = normalise_grid(as_of, dates.clone())?.len();
        let paths = shifts.iter().map(|&s| ReplayPath::constant(s, grid_len)).collect();
        Self::new(as_of, dates, paths)
    }

    /// FX quote moved by the paths' FX multipliers
    pub fn with_fx_pair(mut self, base: Currency, quote: Currency) -> Self {
        self.fx_pair = Some((base, quote));
        self
    }

    /// Last grid index at or before `time`
    fn left_index(&self, grid: GridIndex) -> usize {
        let last = self.times.len() - 1;
        match grid {
            GridIndex::Exact(i) => i.min(last),
            GridIndex::Between(0) => 0,
            GridIndex::Between(i) => (i - 1).min(last),
        }
    }
}

impl SimulationEngine for ScenarioReplayEngine {
    type Path = ReplayHandle;

    fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    fn simulation_dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    fn path_count(&self) -> usize {
        self.paths.len()
    }

    fn path(&self, index: usize) -> LsmResult<Self::Path> {
        self.paths
            .get(index)
            .cloned()
            .map(|path| ReplayHandle { path, fx_spot: None })
            .ok_or(LsmError::MissingPath { index })
    }

    fn evolve(
        &self,
        path: &mut Self::Path,
        grid: GridIndex,
        time: f64,
        date: NaiveDate,
        env: &mut MarketEnvironment,
    ) -> LsmResult<()> {
        let replay = &path.path;
        let k = self.left_index(grid);
        let shift = replay.rate_shifts[k];

        let mut integral = 0.0;
        for i in 0..k {
            integral += replay.rate_shifts[i] * (self.times[i + 1] - self.times[i]);
        }
        integral += shift * (time - self.times[k]).max(0.0);
        let stochastic = (-integral).exp();

        for curve in env.discount_curves_mut() {
            let deflator = curve.base_discount(time) * stochastic;
            curve.set_state(CurveState {
                reference_date: date,
                time,
                deflator,
                factor: shift,
                loading: FactorLoading::Parallel,
            });
        }
        for curve in env.forward_curves_mut() {
            let deflator = curve.base_discount(time) * stochastic;
            curve.set_state(CurveState {
                reference_date: date,
                time,
                deflator,
                factor: shift,
                loading: FactorLoading::Parallel,
            });
        }
        for curve in env.credit_curves_mut() {
            curve.set_reference_date(date);
        }

        if let Some((base, quote)) = self.fx_pair {
            if let Some(&m) = replay.fx_multipliers.get(k) {
                let spot = match path.fx_spot {
                    Some(spot) => spot,
                    None => {
                        let spot = env.fx_rate(base, quote)?;
                        path.fx_spot = Some(spot);
                        spot
                    }
                };
                env.set_fx_rate(base, quote, spot * m);
            }
        }

        env.set_current_date(date);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::YieldCurve;
    use approx::assert_relative_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_zero_shift_reproduces_curve_exactly() {
        let engine = ScenarioReplayEngine::constant_shifts(date(2025, 1, 1), vec![date(2026, 1, 1)], &[0.0]).unwrap();
        let mut env = MarketEnvironment::new(date(2025, 1, 1))
            .with_discount_curve(YieldCurve::flat("USD", Currency::USD, date(2025, 1, 1), 0.04));
        let mut path = engine.path(0).unwrap();
        let pay = date(2025, 7, 1);
        let t = year_fraction(date(2025, 1, 1), pay);

        engine
            .evolve(&mut path, GridIndex::locate(engine.simulation_dates(), pay), t, pay, &mut env)
            .unwrap();

        let curve = &env.discount_curves()[0];
        assert_eq!(curve.deflator(), curve.base_discount(t));
    }

    #[test]
    fn test_constant_shift_deflator() {
        let as_of = date(2025, 1, 1);
        let engine = ScenarioReplayEngine::constant_shifts(as_of, vec![date(2026, 1, 1), date(2027, 1, 1)], &[0.01]).unwrap();
        let mut env = MarketEnvironment::new(as_of)
            .with_discount_curve(YieldCurve::flat("USD", Currency::USD, as_of, 0.02));
        let mut path = engine.path(0).unwrap();
        let target = date(2027, 1, 1);
        let t = year_fraction(as_of, target);

        engine.evolve(&mut path, GridIndex::Exact(2), t, target, &mut env).unwrap();

        assert_relative_eq!(env.discount_curves()[0].deflator(), (-0.03 * t).exp(), epsilon = 1e-12);
        assert_relative_eq!(env.discount_curves()[0].short_rate(), 0.03, epsilon = 1e-10);
    }

    #[test]
    fn test_fx_multipliers_scale_initial_quote() {
        let as_of = date(2025, 1, 1);
        let path = ReplayPath {
            rate_shifts: vec![0.0; 3],
            fx_multipliers: vec![1.0, 1.2, 0.9],
        };
        let engine = ScenarioReplayEngine::new(as_of, vec![date(2026, 1, 1), date(2027, 1, 1)], vec![path])
            .unwrap()
            .with_fx_pair(Currency::EUR, Currency::USD);
        let mut env = MarketEnvironment::new(as_of)
            .with_discount_curve(YieldCurve::flat("USD", Currency::USD, as_of, 0.02))
            .with_fx_rate(Currency::EUR, Currency::USD, 1.1);
        let mut handle = engine.path(0).unwrap();

        let one_year = date(2026, 1, 1);
        engine
            .evolve(&mut handle, GridIndex::Exact(1), 1.0, one_year, &mut env)
            .unwrap();
        assert_relative_eq!(env.fx_rate(Currency::EUR, Currency::USD).unwrap(), 1.32, epsilon = 1e-12);

        // Between grid points the left multiplier applies
        let mid = date(2026, 7, 1);
        let t = year_fraction(as_of, mid);
        engine
            .evolve(&mut handle, GridIndex::locate(engine.simulation_dates(), mid), t, mid, &mut env)
            .unwrap();
        assert_relative_eq!(env.fx_rate(Currency::EUR, Currency::USD).unwrap(), 1.32, epsilon = 1e-12);

        // Multipliers apply to the spot captured on first use, not the moved quote
        engine
            .evolve(&mut handle, GridIndex::Exact(2), 2.0, date(2027, 1, 1), &mut env)
            .unwrap();
        assert_relative_eq!(env.fx_rate(Currency::EUR, Currency::USD).unwrap(), 0.99, epsilon = 1e-12);
    }

    #[test]
    fn test_fx_pair_without_quote_fails() {
        let as_of = date(2025, 1, 1);
        let path = ReplayPath {
            rate_shifts: vec![0.0; 2],
            fx_multipliers: vec![1.0, 1.1],
        };
        let engine = ScenarioReplayEngine::new(as_of, vec![date(2026, 1, 1)], vec![path])
            .unwrap()
            .with_fx_pair(Currency::GBP, Currency::USD);
        let mut env = MarketEnvironment::new(as_of)
            .with_discount_curve(YieldCurve::flat("USD", Currency::USD, as_of, 0.02));
        let mut handle = engine.path(0).unwrap();

        let err = engine
            .evolve(&mut handle, GridIndex::Exact(0), 0.0, as_of, &mut env)
            .unwrap_err();
        assert!(matches!(err, LsmError::MissingFxRate { .. }));
    }

    #[test]
    fn test_mismatched_path_rejected() {
        let path = ReplayPath {
            rate_shifts: vec![0.0],
            fx_multipliers: Vec::new(),
        };
        let result = ScenarioReplayEngine::new(date(2025, 1, 1), vec![date(2026, 1, 1)], vec![path]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_path_is_error() {
        let engine = ScenarioReplayEngine::constant_shifts(date(2025, 1, 1), vec![date(2026, 1, 1)], &[0.0]).unwrap();
        assert!(matches!(engine.path(5), Err(LsmError::MissingPath { index: 5 })));
    }
}
