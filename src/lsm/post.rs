//! Post-processing after backward induction
//!
//! Completes the MtM profile for dates beyond the last exercise date and
//! propagates exercise outcomes forward: once a path is exercised its later
//! MtM is the exercised leg's value under physical settlement, 0 under cash
//! settlement.

use crate::error::LsmResult;

use super::backward::{regress_legs, BackwardOutcome, BackwardSettings};
use super::partition::Partition;
use super::pricing_data::PricingData;
use super::workspace::Workspace;

pub fn run_post(
    ws: &mut Workspace,
    partition: &[Partition],
    data: &PricingData,
    outcome: &BackwardOutcome,
    settings: &BackwardSettings,
) -> LsmResult<()> {
    let last = outcome.last_exercise;
    let dates = ws.len();
    regress_legs(ws, partition, data, last + 1..dates, settings)?;

    let stabilization = settings.stabilization;
    ws.for_each_date(settings.parallel, |j, slice| {
        if j <= last || !partition[j].flags.is_value_date() {
            return Ok(());
        }
        let Some(solver) = slice.solver.as_ref() else {
            return Ok(());
        };
        let fit = solver.solve(&slice.carried, &stabilization)?;
        slice.record_fit(&fit);
        for (path, value) in fit.values.iter().enumerate() {
            slice.set_mtm(path, *value);
        }
        Ok(())
    })?;

    // Every path is worth the fair value at the valuation date
    let paths = ws.paths;
    if paths > 0 {
        let price = outcome.path_values.iter().sum::<f64>() / paths as f64;
        if let Some(first) = ws.slices.first_mut() {
            for path in 0..paths {
                first.set_mtm(path, price);
            }
        }
    }

    for (path, record) in outcome.exercise.iter().enumerate() {
        let Some(record) = record else {
            continue;
        };
        let physical = data
            .leg(record.direction)
            .is_some_and(|leg| !leg.is_cash_settled());

        for slice in ws.slices.iter_mut().skip(record.index + 1) {
            let value = if physical {
                slice.leg_value(record.direction)[path]
            } else {
                0.0
            };
            slice.set_mtm(path, value);
        }
    }

    Ok(())
}
