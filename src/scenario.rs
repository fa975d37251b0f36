//! Scenario runner for batch revaluations
//!
//! Holds a base market once, then revalues instruments under the base market,
//! a list of alternative markets, or parallel-shifted copies of the base.

use serde::{Deserialize, Serialize};

use crate::error::{LsmError, LsmResult};
use crate::instrument::{BasisFunctions, Instrument};
use crate::lsm::{LsmConfig, LsmEngine, Valuation};
use crate::market::{Currency, MarketEnvironment};
use crate::simulation::SimulationEngine;

/// Bump-and-reprice result of a parallel curve shift
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftSensitivity {
    pub bump: f64,
    pub base_price: f64,
    pub up_price: f64,
    pub down_price: f64,
    /// Central difference `(up - down) / (2 * bump)`
    pub delta: f64,
}

/// Pre-loaded scenario runner
///
/// # Example
/// ```ignore
/// let runner = ScenarioRunner::new(market, Currency::USD);
///
/// for shift in [-0.01, 0.0, 0.01] {
///     let valuation = runner.run_market(&bond, &runner.market().bumped(shift), &sim, Some(&basis))?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    base_market: MarketEnvironment,
    numeraire: Currency,
    config: LsmConfig,
}

impl ScenarioRunner {
    /// Runner with the default engine configuration
    pub fn new(market: MarketEnvironment, numeraire: Currency) -> Self {
        Self {
            base_market: market,
            numeraire,
            config: LsmConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LsmConfig) -> Self {
        self.config = config;
        self
    }

    /// Value under the base market
    pub fn run<S: SimulationEngine>(
        &self,
        instrument: &Instrument,
        simulation: &S,
        basis: Option<&dyn BasisFunctions>,
    ) -> LsmResult<Valuation> {
        self.run_market(instrument, &self.base_market, simulation, basis)
    }

    /// Value under an arbitrary market
    pub fn run_market<S: SimulationEngine>(
        &self,
        instrument: &Instrument,
        market: &MarketEnvironment,
        simulation: &S,
        basis: Option<&dyn BasisFunctions>,
    ) -> LsmResult<Valuation> {
        let engine = LsmEngine::new(self.config.clone());
        engine.calculate(instrument, market, simulation, self.numeraire, basis, &[])
    }

    /// Value one instrument under several markets; the first failure aborts
    pub fn run_scenarios<S: SimulationEngine>(
        &self,
        instrument: &Instrument,
        markets: &[MarketEnvironment],
        simulation: &S,
        basis: Option<&dyn BasisFunctions>,
    ) -> LsmResult<Vec<Valuation>> {
        markets
            .iter()
            .map(|market| self.run_market(instrument, market, simulation, basis))
            .collect()
    }

    /// Value several instruments under the base market
    pub fn run_batch<S: SimulationEngine>(
        &self,
        instruments: &[Instrument],
        simulation: &S,
        basis: Option<&dyn BasisFunctions>,
    ) -> LsmResult<Vec<Valuation>> {
        instruments
            .iter()
            .map(|instrument| self.run(instrument, simulation, basis))
            .collect()
    }

    /// Price change per unit parallel shift of every yield curve
    ///
    /// The same simulation is reused for both bumps, so path noise cancels.
    pub fn parallel_shift_sensitivity<S: SimulationEngine>(
        &self,
        instrument: &Instrument,
        simulation: &S,
        basis: Option<&dyn BasisFunctions>,
        bump: f64,
    ) -> LsmResult<ShiftSensitivity> {
        if bump <= 0.0 || !bump.is_finite() {
            return Err(LsmError::invalid_input(format!(
                "shift bump must be positive, got {}",
                bump
            )));
        }

        let base = self.run(instrument, simulation, basis)?;
        let up = self.run_market(instrument, &self.base_market.bumped(bump), simulation, basis)?;
        let down = self.run_market(instrument, &self.base_market.bumped(-bump), simulation, basis)?;
        let delta = (up.price - down.price) / (2.0 * bump);
        log::debug!("parallel shift {}: up {:.6}, down {:.6}, delta {:.6}", bump, up.price, down.price, delta);

        Ok(ShiftSensitivity {
            bump,
            base_price: base.price,
            up_price: up.price,
            down_price: down.price,
            delta,
        })
    }

    pub fn market(&self) -> &MarketEnvironment {
        &self.base_market
    }

    /// Mutable base market for customisation between runs
    pub fn market_mut(&mut self) -> &mut MarketEnvironment {
        &mut self.base_market
    }

    pub fn config(&self) -> &LsmConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::year_fraction;
    use crate::instrument::{AnalyticPayoff, CashflowStream, ExerciseEvaluator, ExerciseSchedule};
    use crate::market::YieldCurve;
    use crate::simulation::ScenarioReplayEngine;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn market(rate: f64) -> MarketEnvironment {
        MarketEnvironment::new(date(2025, 1, 1))
            .with_discount_curve(YieldCurve::flat("USD-OIS", Currency::USD, date(2025, 1, 1), rate))
    }

    fn setup() -> (Instrument, ScenarioReplayEngine) {
        let as_of = date(2025, 1, 1);
        let bond = CashflowStream::fixed_rate_bond(Currency::USD, as_of, date(2028, 1, 1), 12, 5.0, 100.0).unwrap();
        let grid = vec![date(2026, 1, 1), date(2027, 1, 1), date(2028, 1, 1)];
        let sim = ScenarioReplayEngine::constant_shifts(as_of, grid, &[0.0]).unwrap();
        (Instrument::new(1.0, bond), sim)
    }

    #[test]
    fn test_run_scenarios_orders_by_rate() {
        let (bond, sim) = setup();
        let runner = ScenarioRunner::new(market(0.03), Currency::USD).with_config(LsmConfig::serial());

        let markets: Vec<_> = [0.01, 0.03, 0.05].iter().map(|&r| market(r)).collect();
        let results = runner.run_scenarios(&bond, &markets, &sim, None).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].price > results[1].price);
        assert!(results[1].price > results[2].price);
        assert_eq!(results[1].price, runner.run(&bond, &sim, None).unwrap().price);
    }

    #[test]
    fn test_run_batch_values_each_instrument() {
        let (bond, sim) = setup();
        let runner = ScenarioRunner::new(market(0.03), Currency::USD);
        let double = Instrument::new(2.0, bond.underlying.clone());

        let results = runner.run_batch(&[bond.clone(), double], &sim, None).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].price, runner.run(&bond, &sim, None).unwrap().price);
        assert_relative_eq!(results[1].price, 2.0 * results[0].price, max_relative = 1e-12);

        let callable = bond.with_call(ExerciseEvaluator::AnalyticFormula {
            schedule: ExerciseSchedule::flat(vec![date(2026, 1, 1)], 0.0, true),
            payoff: AnalyticPayoff::Redemption { amount: 100.0 },
        });
        let err = runner.run_batch(&[callable], &sim, None).unwrap_err();
        assert!(matches!(err, LsmError::MissingBasisFunctions { .. }));
    }

    #[test]
    fn test_parallel_shift_matches_duration() {
        let (bond, sim) = setup();
        let runner = ScenarioRunner::new(market(0.03), Currency::USD);

        let sensitivity = runner.parallel_shift_sensitivity(&bond, &sim, None, 1e-4).unwrap();

        let as_of = date(2025, 1, 1);
        let flows = [(date(2026, 1, 1), 5.0), (date(2027, 1, 1), 5.0), (date(2028, 1, 1), 105.0)];
        let expected: f64 = flows
            .iter()
            .map(|(d, cf)| {
                let t = year_fraction(as_of, *d);
                -t * cf * (-0.03 * t).exp()
            })
            .sum();

        assert_relative_eq!(sensitivity.delta, expected, max_relative = 1e-6);
        assert!(sensitivity.up_price < sensitivity.base_price);
        assert!(sensitivity.down_price > sensitivity.base_price);
    }

    #[test]
    fn test_rejects_non_positive_bump() {
        let (bond, sim) = setup();
        let runner = ScenarioRunner::new(market(0.03), Currency::USD);
        assert!(runner.parallel_shift_sensitivity(&bond, &sim, None, 0.0).is_err());
    }
}
