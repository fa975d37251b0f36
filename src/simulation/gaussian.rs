//! Seeded one-factor Gaussian short-rate engine
//!
//! The factor `x` follows an Ornstein-Uhlenbeck process sampled exactly on the
//! simulation grid; every yield curve in the environment is deformed with a
//! Hull-White loading of `x`. The deflator is
//! `P(0,t) * exp(-convexity(t) - ∫x ds)` with the integral accumulated by the
//! trapezoid rule. An optional lognormal FX factor moves one quote.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::dates::year_fraction;
use crate::error::{LsmError, LsmResult};
use crate::market::{Currency, CurveState, FactorLoading, MarketEnvironment};

use super::{bracket, normalise_grid, GridIndex, SimulationEngine};

/// Lognormal FX factor driven by an independent normal stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxFactor {
    /// Base currency of the simulated quote
    pub base: Currency,
    /// Quote currency of the simulated quote
    pub quote: Currency,
    /// Lognormal volatility
    pub volatility: f64,
    /// Drift of the log quote (rate differential)
    pub drift: f64,
}

/// Pre-drawn path of the Gaussian engine
#[derive(Debug, Clone)]
pub struct GaussianPath {
    index: usize,
    factor: Vec<f64>,
    integral: Vec<f64>,
    fx_multiplier: Vec<f64>,
    fx_spot: Option<f64>,
}

impl GaussianPath {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Factor values on the simulation grid
    pub fn factor(&self) -> &[f64] {
        &self.factor
    }
}

/// Hull-White style reference engine
#[derive(Debug, Clone)]
pub struct GaussianShortRateEngine {
    as_of: NaiveDate,
    dates: Vec<NaiveDate>,
    times: Vec<f64>,
    paths: usize,
    seed: u64,
    mean_reversion: f64,
    volatility: f64,
    fx: Option<FxFactor>,
}

impl GaussianShortRateEngine {
    /// Create an engine on a simulation grid (the valuation date is added if missing)
    pub fn new(
        as_of: NaiveDate,
        dates: Vec<NaiveDate>,
        paths: usize,
        seed: u64,
        mean_reversion: f64,
        volatility: f64,
    ) -> LsmResult<Self> {
        if paths == 0 {
            return Err(LsmError::invalid_input("path count must be positive"));
        }
        if volatility < 0.0 || !volatility.is_finite() {
            return Err(LsmError::invalid_input(format!(
                "volatility must be finite and non-negative, got {}",
                volatility
            )));
        }

        let dates = normalise_grid(as_of, dates)?;
        let times = dates.iter().map(|d| year_fraction(as_of, *d)).collect();

        Ok(Self {
            as_of,
            dates,
            times,
            paths,
            seed,
            mean_reversion,
            volatility,
            fx: None,
        })
    }

    /// Attach a lognormal FX factor
    pub fn with_fx(mut self, fx: FxFactor) -> Self {
        self.fx = Some(fx);
        self
    }

    pub fn loading(&self) -> FactorLoading {
        FactorLoading::MeanReverting {
            mean_reversion: self.mean_reversion,
            volatility: self.volatility,
        }
    }

    /// Per-path seed, independent of thread scheduling
    fn path_seed(&self, index: usize) -> u64 {
        self.seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Exact OU transition `(decay, standard deviation)` over `dt`
    fn transition(&self, dt: f64) -> (f64, f64) {
        let a = self.mean_reversion;
        let sigma = self.volatility;
        if a.abs() < 1e-8 {
            (1.0, sigma * dt.sqrt())
        } else {
            let decay = (-a * dt).exp();
            (decay, sigma * ((1.0 - decay * decay) / (2.0 * a)).sqrt())
        }
    }
}

impl SimulationEngine for GaussianShortRateEngine {
    type Path = GaussianPath;

    fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    fn simulation_dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    fn path_count(&self) -> usize {
        self.paths
    }

    fn path(&self, index: usize) -> LsmResult<GaussianPath> {
        if index >= self.paths {
            return Err(LsmError::MissingPath { index });
        }

        let mut rng = StdRng::seed_from_u64(self.path_seed(index));
        let n = self.times.len();
        let mut factor = vec![0.0; n];
        let mut integral = vec![0.0; n];
        let mut fx_multiplier = vec![1.0; n];

        for k in 1..n {
            let dt = self.times[k] - self.times[k - 1];
            let (decay, std_dev) = self.transition(dt);
            let z: f64 = rng.sample(StandardNormal);
            factor[k] = factor[k - 1] * decay + std_dev * z;
            integral[k] = integral[k - 1] + 0.5 * (factor[k - 1] + factor[k]) * dt;

            if let Some(fx) = &self.fx {
                let w: f64 = rng.sample(StandardNormal);
                let log_step = (fx.drift - 0.5 * fx.volatility * fx.volatility) * dt
                    + fx.volatility * dt.sqrt() * w;
                fx_multiplier[k] = fx_multiplier[k - 1] * log_step.exp();
            }
        }

        Ok(GaussianPath {
            index,
            factor,
            integral,
            fx_multiplier,
            fx_spot: None,
        })
    }

    fn evolve(
        &self,
        path: &mut GaussianPath,
        grid: GridIndex,
        time: f64,
        date: NaiveDate,
        env: &mut MarketEnvironment,
    ) -> LsmResult<()> {
        let (lo, hi, w) = bracket(&self.times, grid, time);
        let x = path.factor[lo] + w * (path.factor[hi] - path.factor[lo]);

        // Beyond the grid the factor is held flat and keeps accruing
        let integral = if lo == hi {
            path.integral[lo] + path.factor[lo] * (time - self.times[lo]).max(0.0)
        } else {
            path.integral[lo] + 0.5 * (path.factor[lo] + x) * (time - self.times[lo])
        };

        let loading = self.loading();
        let stochastic = (-integral - loading.drift_convexity(time)).exp();

        for curve in env.discount_curves_mut() {
            let deflator = curve.base_discount(time) * stochastic;
            curve.set_state(CurveState {
                reference_date: date,
                time,
                deflator,
                factor: x,
                loading,
            });
        }
        for curve in env.forward_curves_mut() {
            let deflator = curve.base_discount(time) * stochastic;
            curve.set_state(CurveState {
                reference_date: date,
                time,
                deflator,
                factor: x,
                loading,
            });
        }
        for curve in env.credit_curves_mut() {
            curve.set_reference_date(date);
        }

        if let Some(fx) = &self.fx {
            let spot = match path.fx_spot {
                Some(spot) => spot,
                None => {
                    let spot = env.fx_rate(fx.base, fx.quote)?;
                    path.fx_spot = Some(spot);
                    spot
                }
            };
            let m = path.fx_multiplier[lo] + w * (path.fx_multiplier[hi] - path.fx_multiplier[lo]);
            env.set_fx_rate(fx.base, fx.quote, spot * m);
        }

        env.set_current_date(date);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::periodic_dates;
    use crate::market::YieldCurve;
    use approx::assert_relative_eq;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn engine(vol: f64) -> GaussianShortRateEngine {
        let end = NaiveDate::from_ymd_opt(2028, 1, 1).unwrap();
        GaussianShortRateEngine::new(as_of(), periodic_dates(as_of(), end, 3), 16, 42, 0.05, vol).unwrap()
    }

    fn market() -> MarketEnvironment {
        MarketEnvironment::new(as_of())
            .with_discount_curve(YieldCurve::flat("USD", Currency::USD, as_of(), 0.03))
            .with_fx_rate(Currency::EUR, Currency::USD, 1.1)
    }

    #[test]
    fn test_paths_are_reproducible() {
        let engine = engine(0.01);
        let a = engine.path(3).unwrap();
        let b = engine.path(3).unwrap();
        assert_eq!(a.factor(), b.factor());
        assert_ne!(a.factor(), engine.path(4).unwrap().factor());
        assert!(matches!(engine.path(16), Err(LsmError::MissingPath { index: 16 })));
    }

    #[test]
    fn test_zero_volatility_deflator_matches_curve() {
        let engine = engine(0.0);
        let mut path = engine.path(0).unwrap();
        let mut env = market();
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let t = year_fraction(as_of(), date);

        engine
            .evolve(&mut path, GridIndex::locate(engine.simulation_dates(), date), t, date, &mut env)
            .unwrap();

        let curve = &env.discount_curves()[0];
        assert_eq!(curve.reference_date(), date);
        assert_relative_eq!(curve.deflator(), (-0.03 * t).exp(), epsilon = 1e-14);
    }

    #[test]
    fn test_evolve_is_idempotent() {
        let engine = engine(0.01).with_fx(FxFactor {
            base: Currency::EUR,
            quote: Currency::USD,
            volatility: 0.1,
            drift: 0.0,
        });
        let mut path = engine.path(1).unwrap();
        let mut env = market();
        let date = NaiveDate::from_ymd_opt(2025, 8, 15).unwrap();
        let t = year_fraction(as_of(), date);
        let grid = GridIndex::locate(engine.simulation_dates(), date);
        assert!(grid.needs_interpolation());

        engine.evolve(&mut path, grid, t, date, &mut env).unwrap();
        let first = (env.discount_curves()[0].deflator(), env.fx_rate(Currency::EUR, Currency::USD).unwrap());
        engine.evolve(&mut path, grid, t, date, &mut env).unwrap();
        let second = (env.discount_curves()[0].deflator(), env.fx_rate(Currency::EUR, Currency::USD).unwrap());

        assert_eq!(first, second);
    }
}
