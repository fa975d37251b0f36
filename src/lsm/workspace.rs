//! Date-major workspace filled by the forward pass
//!
//! Each [`DateSlice`] holds every per-path array of one partition date, so
//! backward-pass workers can own a date exclusively. All monetary arrays are
//! in deflated numeraire units except `mtm`, which is in the instrument's
//! natural currency.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::error::LsmResult;
use crate::instrument::LegSide;

use super::forward::PathRecord;
use super::regression::{Fit, SvdSolve};

/// Per-path arrays of one partition date
#[derive(Debug, Clone)]
pub struct DateSlice {
    /// Underlying flows paid in `(d_{j-1}, d_j]`
    pub coupons: Vec<f64>,
    pub call_coupons: Vec<f64>,
    pub put_coupons: Vec<f64>,
    /// Value of the call leg (analytic sample or regressed)
    pub call_value: Vec<f64>,
    pub put_value: Vec<f64>,
    /// Realised call-leg flows after this date
    pub call_realised: Vec<f64>,
    pub put_realised: Vec<f64>,
    /// Numeraire deflator
    pub deflator: Vec<f64>,
    /// Natural-to-numeraire FX sample
    pub fx: Vec<f64>,
    /// Basis realisations, `paths × dimension`
    pub design: DMatrix<f64>,
    pub solver: Option<SvdSolve>,
    /// Value carried into this date by the backward sweep
    pub carried: Vec<f64>,
    /// Mark-to-market in natural currency
    pub mtm: Vec<f64>,
    /// Stabilisation rounds spent on this date
    pub rounds: usize,
    /// Worst raw violation seen on this date
    pub max_violation: f64,
}

impl DateSlice {
    pub fn leg_value(&self, side: LegSide) -> &[f64] {
        match side {
            LegSide::Call => &self.call_value,
            LegSide::Put => &self.put_value,
        }
    }

    /// Store a numeraire value as natural-currency MtM
    pub fn set_mtm(&mut self, path: usize, value: f64) {
        let fx = self.fx[path];
        self.mtm[path] = if fx != 0.0 { value / fx } else { 0.0 };
    }

    pub fn record_fit(&mut self, fit: &Fit) {
        self.rounds += fit.rounds;
        self.max_violation = self.max_violation.max(fit.initial_violation);
    }
}

/// Flows paid after the last partition date
#[derive(Debug, Clone, Default)]
pub struct TailBuckets {
    pub coupons: Vec<f64>,
    pub call_coupons: Vec<f64>,
    pub put_coupons: Vec<f64>,
}

impl TailBuckets {
    pub fn leg_coupons(&self, side: LegSide) -> &[f64] {
        match side {
            LegSide::Call => &self.call_coupons,
            LegSide::Put => &self.put_coupons,
        }
    }
}

/// All arrays of one valuation
#[derive(Debug, Clone)]
pub struct Workspace {
    pub slices: Vec<DateSlice>,
    pub tail: TailBuckets,
    pub paths: usize,
    pub dimension: usize,
}

impl Workspace {
    /// Transpose path-major forward records into date slices
    pub fn from_records(records: &[PathRecord], dates: usize, dimension: usize) -> Self {
        let paths = records.len();
        let column = |f: fn(&PathRecord) -> &[f64], j: usize| -> Vec<f64> {
            records.iter().map(|r| f(r)[j]).collect()
        };

        let slices = (0..dates)
            .map(|j| DateSlice {
                coupons: column(|r| r.coupons.as_slice(), j),
                call_coupons: column(|r| r.call_coupons.as_slice(), j),
                put_coupons: column(|r| r.put_coupons.as_slice(), j),
                call_value: column(|r| r.call_value.as_slice(), j),
                put_value: column(|r| r.put_value.as_slice(), j),
                call_realised: vec![0.0; paths],
                put_realised: vec![0.0; paths],
                deflator: column(|r| r.deflator.as_slice(), j),
                fx: column(|r| r.fx.as_slice(), j),
                design: DMatrix::from_fn(paths, dimension, |p, k| records[p].basis[j * dimension + k]),
                solver: None,
                carried: vec![0.0; paths],
                mtm: vec![0.0; paths],
                rounds: 0,
                max_violation: 0.0,
            })
            .collect();

        let tail = TailBuckets {
            coupons: column(|r| r.coupons.as_slice(), dates),
            call_coupons: column(|r| r.call_coupons.as_slice(), dates),
            put_coupons: column(|r| r.put_coupons.as_slice(), dates),
        };

        Self {
            slices,
            tail,
            paths,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Run a fallible job on every date, across the rayon pool when `parallel`
    pub fn for_each_date<F>(&mut self, parallel: bool, job: F) -> LsmResult<()>
    where
        F: Fn(usize, &mut DateSlice) -> LsmResult<()> + Send + Sync,
    {
        if parallel {
            self.slices
                .par_iter_mut()
                .enumerate()
                .try_for_each(|(j, slice)| job(j, slice))
        } else {
            self.slices
                .iter_mut()
                .enumerate()
                .try_for_each(|(j, slice)| job(j, slice))
        }
    }

    /// Sum the leg flows paid after each date into `*_realised`
    pub fn accumulate_leg_flows(&mut self, side: LegSide) {
        let mut running = self.tail.leg_coupons(side).to_vec();
        for slice in self.slices.iter_mut().rev() {
            let (realised, coupons) = match side {
                LegSide::Call => (&mut slice.call_realised, &slice.call_coupons),
                LegSide::Put => (&mut slice.put_realised, &slice.put_coupons),
            };
            realised.copy_from_slice(&running);
            for (r, c) in running.iter_mut().zip(coupons.iter()) {
                *r += c;
            }
        }
    }

    /// Factorise every design matrix after the valuation date
    pub fn factorize(&mut self, svd_tolerance: f64, parallel: bool) -> LsmResult<()> {
        if self.dimension == 0 || self.paths == 0 {
            return Ok(());
        }
        self.for_each_date(parallel, |j, slice| {
            if j > 0 {
                let solver = SvdSolve::factorize(&slice.design, svd_tolerance, j)?;
                if solver.is_rank_deficient() {
                    log::warn!(
                        "partition {}: design matrix rank {} below dimension {}",
                        j,
                        solver.rank(),
                        slice.design.ncols()
                    );
                }
                slice.solver = Some(solver);
            }
            Ok(())
        })
    }
}
