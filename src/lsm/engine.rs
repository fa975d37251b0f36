//! Least-squares Monte Carlo valuation engine
//!
//! [`LsmEngine::calculate`] runs the phases of one valuation strictly in
//! sequence: partition, pricing data, forward simulation, factorisation,
//! backward induction, post-processing and exposure generation.

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LsmError, LsmResult};
use crate::instrument::{BasisFunctions, Instrument, LegSide};
use crate::market::{Currency, MarketEnvironment};
use crate::simulation::SimulationEngine;

use super::backward::{run_backward, BackwardOutcome, BackwardSettings};
use super::exposure::{generate_exposures, ExposureGrid};
use super::forward::{fx_to_numeraire, ForwardPass};
use super::partition::{build_partition, LegDates, PartitionInputs};
use super::post::run_post;
use super::pricing_data::{EventSchedule, PricingData};
use super::regression::Stabilization;
use super::result::{Valuation, ValuationDiagnostics};
use super::workspace::Workspace;

/// How the continuation value is estimated at exercise dates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExerciseStrategy {
    /// Regression of the carried value on the basis functions
    #[default]
    LeastSquares,
    /// Realised carried value of the path (upper-biased benchmark)
    PerfectForesight,
}

/// Configuration for a valuation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsmConfig {
    /// Singular values below `svd_tolerance * s_max` are dropped
    pub svd_tolerance: f64,

    /// Box re-projection rounds per regression
    pub max_stabilization_iterations: usize,

    /// Worst relative violation accepted without another round
    pub stabilization_tolerance: f64,

    /// Continuation estimator
    pub strategy: ExerciseStrategy,

    /// Run paths and dates across the rayon pool
    pub parallel: bool,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            svd_tolerance: 1e-12,
            max_stabilization_iterations: 10,
            stabilization_tolerance: 1e-5,
            strategy: ExerciseStrategy::LeastSquares,
            parallel: true,
        }
    }
}

impl LsmConfig {
    /// Default settings on a single thread
    pub fn serial() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_path<P: AsRef<Path>>(path: P) -> LsmResult<Self> {
        let file = std::fs::File::open(path)?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(config)
    }

    pub fn with_strategy(mut self, strategy: ExerciseStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_svd_tolerance(mut self, tolerance: f64) -> Self {
        self.svd_tolerance = tolerance;
        self
    }

    pub fn stabilization(&self) -> Stabilization {
        Stabilization {
            max_iterations: self.max_stabilization_iterations,
            tolerance: self.stabilization_tolerance,
        }
    }

    fn backward_settings(&self) -> BackwardSettings {
        BackwardSettings {
            strategy: self.strategy,
            stabilization: self.stabilization(),
            parallel: self.parallel,
        }
    }
}

/// Main valuation engine
#[derive(Debug, Clone, Default)]
pub struct LsmEngine {
    config: LsmConfig,
}

impl LsmEngine {
    pub fn new(config: LsmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LsmConfig {
        &self.config
    }

    /// Price an instrument and optionally generate its exposure profile
    ///
    /// `report_dates` may be unsorted; a basis set is required whenever the
    /// instrument carries an exercise right or report dates are requested.
    pub fn calculate<S: SimulationEngine>(
        &self,
        instrument: &Instrument,
        market: &MarketEnvironment,
        simulation: &S,
        numeraire: Currency,
        basis: Option<&dyn BasisFunctions>,
        report_dates: &[NaiveDate],
    ) -> LsmResult<Valuation> {
        let paths = simulation.path_count();
        self.preflight(instrument, market, paths, numeraire, basis, report_dates)?;

        let as_of = simulation.as_of();
        let mut reports = report_dates.to_vec();
        reports.sort();
        reports.dedup();

        info!(
            "LSM valuation as of {}: {} paths, {} report dates, strategy {:?}",
            as_of,
            paths,
            reports.len(),
            self.config.strategy
        );

        let leg_dates = |side: LegSide| {
            instrument.leg(side).map(|evaluator| LegDates {
                exercise_dates: evaluator.exercise_dates(),
                notify_dates: evaluator.notify_dates(),
                replace_cashflow: evaluator.value_is_conditional_expectation(),
            })
        };
        let inputs = PartitionInputs {
            as_of,
            report_dates: &reports,
            last_cashflow_date: instrument.maturity(),
            call: leg_dates(LegSide::Call),
            put: leg_dates(LegSide::Put),
        };
        let sim_dates = simulation.simulation_dates();
        let partition = build_partition(&inputs, sim_dates);
        debug!("partition built: {} dates", partition.len());

        let data = PricingData::new(instrument, numeraire, basis, as_of, &partition, sim_dates);
        let schedule = EventSchedule::new(&data, &partition);
        let dimension = data.dimension();

        let forward = ForwardPass {
            template: &data,
            schedule: &schedule,
            partition: &partition,
            market,
            simulation,
        };
        let records = forward.run(self.config.parallel)?;
        debug!("forward pass complete: {} path records", records.len());

        let mut ws = Workspace::from_records(&records, partition.len(), dimension);
        drop(records);
        ws.factorize(self.config.svd_tolerance, self.config.parallel)?;

        let settings = self.config.backward_settings();
        let outcome = run_backward(&mut ws, &partition, &data, &settings)?;
        run_post(&mut ws, &partition, &data, &outcome, &settings)?;

        let mean = if paths > 0 {
            outcome.path_values.iter().sum::<f64>() / paths as f64
        } else {
            0.0
        };
        let price = mean * instrument.notional;

        let exposures = if reports.is_empty() {
            None
        } else if partition.iter().all(|p| p.exposure_index.is_none()) {
            debug!("no report date falls inside the instrument's life");
            Some(ExposureGrid::zeros(vec![as_of], paths))
        } else {
            let spot_fx = fx_to_numeraire(data.natural, numeraire, market)?;
            Some(generate_exposures(&partition, &ws, &reports, instrument.notional, spot_fx))
        };

        let diagnostics = Self::diagnostics(&ws, partition.len(), &outcome);
        info!(
            "LSM valuation complete: price {:.6}, {} call / {} put exercises",
            price, diagnostics.call_exercises, diagnostics.put_exercises
        );

        Ok(Valuation {
            price,
            exposures,
            path_values: outcome.path_values,
            exercise: outcome.exercise,
            diagnostics,
        })
    }

    /// Reject inputs that cannot be valued before any path is simulated
    fn preflight(
        &self,
        instrument: &Instrument,
        market: &MarketEnvironment,
        paths: usize,
        numeraire: Currency,
        basis: Option<&dyn BasisFunctions>,
        report_dates: &[NaiveDate],
    ) -> LsmResult<()> {
        for side in [LegSide::Call, LegSide::Put] {
            if let Some(evaluator) = instrument.leg(side) {
                evaluator.validate(side)?;
            }
        }

        match basis {
            None if !report_dates.is_empty() => {
                return Err(LsmError::MissingBasisFunctions {
                    reason: "report dates are requested",
                });
            }
            None if instrument.has_optionality() => {
                return Err(LsmError::MissingBasisFunctions {
                    reason: "an exercise evaluator is supplied",
                });
            }
            Some(basis) if basis.dimension() == 0 => {
                return Err(LsmError::invalid_input("basis set produces no regressors"));
            }
            Some(basis) if basis.dimension() > paths => {
                return Err(LsmError::UnderdeterminedRegression {
                    dimension: basis.dimension(),
                    paths,
                });
            }
            _ => {}
        }

        if paths == 0 {
            return Err(LsmError::invalid_input("simulation has no paths"));
        }

        market.discount_curve(numeraire)?;
        Ok(())
    }

    fn diagnostics(ws: &Workspace, partition_len: usize, outcome: &BackwardOutcome) -> ValuationDiagnostics {
        let count = |side: LegSide| {
            outcome
                .exercise
                .iter()
                .flatten()
                .filter(|record| record.direction == side)
                .count()
        };

        ValuationDiagnostics {
            paths: ws.paths,
            partition_len,
            basis_dimension: ws.dimension,
            regression_dates: ws.slices.iter().filter(|s| s.solver.is_some()).count(),
            rank_deficient_dates: ws
                .slices
                .iter()
                .filter_map(|s| s.solver.as_ref())
                .filter(|solver| solver.is_rank_deficient())
                .count(),
            stabilization_rounds: ws.slices.iter().map(|s| s.rounds).sum(),
            max_initial_violation: ws.slices.iter().map(|s| s.max_violation).fold(0.0, f64::max),
            call_exercises: count(LegSide::Call),
            put_exercises: count(LegSide::Put),
            last_exercise_index: outcome.last_exercise,
        }
    }
}
