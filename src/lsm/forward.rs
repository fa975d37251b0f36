//! Forward pass: simulate every path along the event schedule
//!
//! Each worker clones the pricing data and the market, conforms the market
//! once, resets all per-path state and then walks the event schedule in date
//! order. The environment is evolved only when the event date changes. The
//! worker returns an owned [`PathRecord`]; records are transposed into the
//! date-major workspace once the whole pass has completed.

use chrono::NaiveDate;
use rayon::prelude::*;

use crate::error::LsmResult;
use crate::instrument::LegSide;
use crate::market::{Currency, MarketEnvironment};
use crate::simulation::SimulationEngine;

use super::partition::Partition;
use super::pricing_data::{Action, EventSchedule, LegMode, PricingData, StreamKind};

/// Everything one path contributes to the workspace
#[derive(Debug, Clone, PartialEq)]
pub struct PathRecord {
    /// Underlying flows per bucket; index `n` holds flows after the last date
    pub coupons: Vec<f64>,
    pub call_coupons: Vec<f64>,
    pub put_coupons: Vec<f64>,
    /// Analytic leg values per partition date
    pub call_value: Vec<f64>,
    pub put_value: Vec<f64>,
    pub deflator: Vec<f64>,
    pub fx: Vec<f64>,
    /// Basis realisations, `dates × dimension` row-major
    pub basis: Vec<f64>,
}

impl PathRecord {
    pub fn new(dates: usize, dimension: usize) -> Self {
        Self {
            coupons: vec![0.0; dates + 1],
            call_coupons: vec![0.0; dates + 1],
            put_coupons: vec![0.0; dates + 1],
            call_value: vec![0.0; dates],
            put_value: vec![0.0; dates],
            deflator: vec![0.0; dates],
            fx: vec![0.0; dates],
            basis: vec![0.0; dates * dimension],
        }
    }

    fn buckets_mut(&mut self, stream: StreamKind) -> &mut [f64] {
        match stream {
            StreamKind::Underlying => &mut self.coupons,
            StreamKind::Leg(LegSide::Call) => &mut self.call_coupons,
            StreamKind::Leg(LegSide::Put) => &mut self.put_coupons,
        }
    }

    fn leg_value_mut(&mut self, side: LegSide) -> &mut [f64] {
        match side {
            LegSide::Call => &mut self.call_value,
            LegSide::Put => &mut self.put_value,
        }
    }
}

/// Inputs shared read-only by every forward worker
pub struct ForwardPass<'a, S: SimulationEngine> {
    pub template: &'a PricingData,
    pub schedule: &'a EventSchedule,
    pub partition: &'a [Partition],
    pub market: &'a MarketEnvironment,
    pub simulation: &'a S,
}

impl<'a, S: SimulationEngine> ForwardPass<'a, S> {
    /// Simulate all paths; the first failing path aborts the pass
    pub fn run(&self, parallel: bool) -> LsmResult<Vec<PathRecord>> {
        let paths = self.simulation.path_count();
        if parallel {
            (0..paths)
                .into_par_iter()
                .map(|index| self.simulate_path(index))
                .collect()
        } else {
            (0..paths).map(|index| self.simulate_path(index)).collect()
        }
    }

    /// Walk one path through the event schedule
    pub fn simulate_path(&self, index: usize) -> LsmResult<PathRecord> {
        let mut data = self.template.clone();
        let mut env = self.market.clone();
        env.conform();
        let mut handle = self.simulation.path(index)?;

        // Every piece of path state is cleared before the first value query
        data.reset();

        let dimension = data.dimension();
        let mut record = PathRecord::new(self.partition.len(), dimension);

        let numeraire_index = env.discount_curve_index(data.numeraire)?;
        let credit_index = data
            .credit_curve
            .as_deref()
            .map(|id| env.credit_curve_index(id))
            .transpose()?;

        let mut last_evolved: Option<NaiveDate> = None;

        for event in &self.schedule.events {
            if last_evolved != Some(event.date) {
                self.simulation
                    .evolve(&mut handle, event.grid, event.time, event.date, &mut env)?;
                last_evolved = Some(event.date);
            }
            let deflator = env.discount_curves()[numeraire_index].deflator();

            for action in &event.actions {
                match *action {
                    Action::Fix(stream, i) => {
                        if let Some(wrapper) = data.node_mut(stream, i) {
                            wrapper.fixed_amount = Some(wrapper.node.fix(&env)?);
                        }
                    }
                    Action::Pay(stream, i) => {
                        let currency = match stream {
                            StreamKind::Underlying => data.natural,
                            StreamKind::Leg(side) => data.leg(side).map_or(data.natural, |l| l.currency),
                        };
                        let Some(wrapper) = data.nodes(stream).get(i) else {
                            continue;
                        };
                        let amount = match wrapper.fixed_amount {
                            Some(amount) => amount,
                            None => wrapper.node.fix(&env)?,
                        };
                        let risky = match (stream, credit_index) {
                            (StreamKind::Underlying, Some(c)) => env.credit_curves()[c].risky_factor(event.date),
                            _ => 1.0,
                        };
                        let fx = fx_to_numeraire(currency, data.numeraire, &env)?;
                        record.buckets_mut(stream)[wrapper.bucket] += amount * deflator * fx * risky;
                    }
                    Action::Observe(j) => {
                        self.observe(j, deflator, &mut data, &env, &mut record)?;
                    }
                }
            }
        }

        Ok(record)
    }

    /// Record deflator, FX, leg values and basis realisation at partition `j`
    fn observe(
        &self,
        j: usize,
        deflator: f64,
        data: &mut PricingData,
        env: &MarketEnvironment,
        record: &mut PathRecord,
    ) -> LsmResult<()> {
        let partition = &self.partition[j];
        let numeraire = data.numeraire;

        record.deflator[j] = deflator;
        record.fx[j] = fx_to_numeraire(data.natural, numeraire, env)?;

        for side in [LegSide::Call, LegSide::Put] {
            let notify = match side {
                LegSide::Call => partition.flags.is_call_reset_date(),
                LegSide::Put => partition.flags.is_put_reset_date(),
            };
            let Some(leg) = data.leg_mut(side) else {
                continue;
            };
            if notify {
                leg.evaluator.notify(side, partition.date, env)?;
            }
            if leg.mode == LegMode::Analytic && leg.needs_value(partition) {
                let fx = fx_to_numeraire(leg.currency, numeraire, env)?;
                let value = leg.evaluator.value(partition.date, env)?;
                record.leg_value_mut(side)[j] = value * deflator * fx;
            }
        }

        if let Some(basis) = data.basis.as_mut() {
            basis.generate(partition.date, env, &mut data.basis_buffer)?;
            let dimension = data.basis_buffer.len();
            record.basis[j * dimension..(j + 1) * dimension].copy_from_slice(&data.basis_buffer);
        }

        Ok(())
    }
}

/// Units of numeraire per unit of `currency`
pub(crate) fn fx_to_numeraire(currency: Currency, numeraire: Currency, env: &MarketEnvironment) -> LsmResult<f64> {
    if currency == numeraire {
        Ok(1.0)
    } else {
        env.fx_rate(currency, numeraire)
    }
}
