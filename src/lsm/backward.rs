//! Backward induction over the partition
//!
//! Walks the partition from the last date to index 1 carrying the deflated
//! value of every path. On exercise dates the continuation value is regressed
//! (or taken as realised under perfect foresight) and compared with the
//! intrinsic values of the call and put legs:
//!
//! - continuation above the call intrinsic: the call is exercised
//! - otherwise continuation below the put intrinsic: the put is exercised
//! - otherwise the path continues
//!
//! Exact ties favour continuation. Coupons of the interval `(d_{j-1}, d_j]`
//! are added after the decision regardless of its outcome.

use std::ops::Range;

use crate::error::{LsmError, LsmResult};
use crate::instrument::LegSide;

use super::engine::ExerciseStrategy;
use super::partition::Partition;
use super::pricing_data::{LegData, LegMode, PricingData};
use super::regression::Stabilization;
use super::result::ExerciseRecord;
use super::workspace::{DateSlice, Workspace};

/// Settings shared by backward induction and post-processing
#[derive(Debug, Clone, Copy)]
pub struct BackwardSettings {
    pub strategy: ExerciseStrategy,
    pub stabilization: Stabilization,
    pub parallel: bool,
}

/// Per-path output of backward induction
#[derive(Debug, Clone)]
pub struct BackwardOutcome {
    /// Value carried to the valuation date
    pub path_values: Vec<f64>,
    pub exercise: Vec<Option<ExerciseRecord>>,
    /// Partition index of the last exercise date (0 when none)
    pub last_exercise: usize,
}

/// Outcome of the three-way comparison on one path
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Continue,
    Exercise(LegSide, f64),
}

/// Compare continuation with the available intrinsic values
pub fn decide(continuation: f64, call: Option<f64>, put: Option<f64>) -> Decision {
    if let Some(call) = call {
        if continuation > call {
            return Decision::Exercise(LegSide::Call, call);
        }
    }
    if let Some(put) = put {
        if continuation < put {
            return Decision::Exercise(LegSide::Put, put);
        }
    }
    Decision::Continue
}

/// Regress cashflow-backed leg values on the dates in `dates`
pub fn regress_legs(
    ws: &mut Workspace,
    partition: &[Partition],
    data: &PricingData,
    dates: Range<usize>,
    settings: &BackwardSettings,
) -> LsmResult<()> {
    let legs: Vec<&LegData> = [data.call.as_ref(), data.put.as_ref()]
        .into_iter()
        .flatten()
        .filter(|leg| leg.mode == LegMode::Regression)
        .collect();
    if legs.is_empty() || dates.is_empty() {
        return Ok(());
    }

    for leg in &legs {
        ws.accumulate_leg_flows(leg.side);
    }

    let stabilization = settings.stabilization;
    ws.for_each_date(settings.parallel, |j, slice| {
        if j == 0 || !dates.contains(&j) {
            return Ok(());
        }
        for leg in &legs {
            if !leg.needs_value(&partition[j]) {
                continue;
            }
            let solver = slice.solver.as_ref().ok_or(LsmError::MissingBasisFunctions {
                reason: "a leg is valued by regression",
            })?;
            let target = match leg.side {
                LegSide::Call => &slice.call_realised,
                LegSide::Put => &slice.put_realised,
            };
            let fit = solver.solve(target, &stabilization)?;
            slice.record_fit(&fit);
            match leg.side {
                LegSide::Call => slice.call_value = fit.values,
                LegSide::Put => slice.put_value = fit.values,
            }
        }
        Ok(())
    })
}

/// Run the backward sweep and record exercise decisions
pub fn run_backward(
    ws: &mut Workspace,
    partition: &[Partition],
    data: &PricingData,
    settings: &BackwardSettings,
) -> LsmResult<BackwardOutcome> {
    let paths = ws.paths;
    let last_exercise = partition
        .iter()
        .rposition(|p| p.flags.is_exercise_date())
        .unwrap_or(0);

    regress_legs(ws, partition, data, 1..last_exercise + 1, settings)?;

    let mut carried = ws.tail.coupons.clone();
    let mut exercise = vec![None; paths];

    for j in (1..ws.len()).rev() {
        let p = &partition[j];
        let slice = &mut ws.slices[j];
        slice.carried.copy_from_slice(&carried);

        if j <= last_exercise {
            if p.flags.is_exercise_date() {
                decide_date(j, p, slice, data, settings, &mut carried, &mut exercise)?;
            } else if p.flags.is_value_date() {
                if let Some(solver) = slice.solver.as_ref() {
                    let fit = solver.solve(&carried, &settings.stabilization)?;
                    slice.record_fit(&fit);
                    for (path, value) in fit.values.iter().enumerate() {
                        slice.set_mtm(path, *value);
                    }
                }
            }
        }

        for (value, coupon) in carried.iter_mut().zip(slice.coupons.iter()) {
            *value += coupon;
        }
    }

    if let Some(first) = ws.slices.first_mut() {
        first.carried.copy_from_slice(&carried);
    }

    let exercised = exercise.iter().filter(|e| e.is_some()).count();
    log::debug!(
        "backward induction: {} of {} paths exercised, last exercise index {}",
        exercised,
        paths,
        last_exercise
    );

    Ok(BackwardOutcome {
        path_values: carried,
        exercise,
        last_exercise,
    })
}

/// Exercise decision on every path of one date
fn decide_date(
    j: usize,
    partition: &Partition,
    slice: &mut DateSlice,
    data: &PricingData,
    settings: &BackwardSettings,
    carried: &mut [f64],
    exercise: &mut [Option<ExerciseRecord>],
) -> LsmResult<()> {
    let continuation = match settings.strategy {
        ExerciseStrategy::LeastSquares => {
            let solver = slice.solver.as_ref().ok_or(LsmError::MissingBasisFunctions {
                reason: "an exercise evaluator is supplied",
            })?;
            let fit = solver.solve(carried, &settings.stabilization)?;
            slice.record_fit(&fit);
            fit.values
        }
        ExerciseStrategy::PerfectForesight => carried.to_vec(),
    };

    let call_price = data
        .call
        .as_ref()
        .filter(|_| partition.flags.is_call_exercise_date())
        .map(|leg| leg.evaluator.price(partition.date));
    let put_price = data
        .put
        .as_ref()
        .filter(|_| partition.flags.is_put_exercise_date())
        .map(|leg| leg.evaluator.price(partition.date));

    for path in 0..carried.len() {
        let scale = slice.deflator[path] * slice.fx[path];
        let call = call_price.map(|price| slice.call_value[path] - price * scale);
        let put = put_price.map(|price| slice.put_value[path] - price * scale);
        let cont = continuation[path];

        match decide(cont, call, put) {
            Decision::Exercise(direction, intrinsic) => {
                carried[path] = intrinsic;
                exercise[path] = Some(ExerciseRecord {
                    index: j,
                    date: partition.date,
                    direction,
                });
                slice.set_mtm(path, intrinsic);
            }
            Decision::Continue => {
                if partition.flags.replaces_cashflow() {
                    if let Some(call) = call {
                        carried[path] = carried[path].min(call);
                    }
                    if let Some(put) = put {
                        carried[path] = carried[path].max(put);
                    }
                }
                slice.set_mtm(path, cont);
            }
        }
    }

    Ok(())
}
