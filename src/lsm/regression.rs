//! SVD least-squares solve with box stabilisation
//!
//! The design matrix of a partition date is factorised once; every target
//! regressed on that date (continuation value, call leg, put leg) reuses the
//! factorisation. Fitted values are `U_r U_rᵀ y` where `U_r` keeps the left
//! singular vectors whose singular value exceeds `svd_tolerance * s_max`.
//!
//! Regression extrapolation can push fitted values outside the range of the
//! target. The solve then alternates clamping onto `[min(y), max(y)]` and
//! re-projecting until the worst violation relative to the range drops below
//! the tolerance or the round limit is hit; a final clamp enforces the box.

use nalgebra::{DMatrix, DVector, SVD};
use serde::{Deserialize, Serialize};

use crate::error::{LsmError, LsmResult};

/// Limits of the box re-projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stabilization {
    pub max_iterations: usize,
    /// Worst violation, relative to the target range, accepted without another round
    pub tolerance: f64,
}

impl Default for Stabilization {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-5,
        }
    }
}

/// Fitted values of one regression
#[derive(Debug, Clone, PartialEq)]
pub struct Fit {
    pub values: Vec<f64>,
    /// Re-projection rounds performed
    pub rounds: usize,
    /// Worst relative violation of the raw least-squares fit
    pub initial_violation: f64,
}

/// Factorised design matrix of one partition date
#[derive(Debug, Clone)]
pub struct SvdSolve {
    index: usize,
    projector: DMatrix<f64>,
    singular_values: DVector<f64>,
}

impl SvdSolve {
    /// Factorise a `paths × dimension` design matrix
    pub fn factorize(design: &DMatrix<f64>, svd_tolerance: f64, index: usize) -> LsmResult<Self> {
        if design.nrows() == 0 || design.ncols() == 0 {
            return Err(LsmError::Regression {
                index,
                reason: format!("empty design matrix ({}x{})", design.nrows(), design.ncols()),
            });
        }
        if design.iter().any(|x| !x.is_finite()) {
            return Err(LsmError::Regression {
                index,
                reason: "design matrix contains non-finite values".to_string(),
            });
        }

        let svd = SVD::new(design.clone(), true, true);
        let u = svd.u.as_ref().ok_or_else(|| LsmError::Regression {
            index,
            reason: "left singular vectors were not computed".to_string(),
        })?;

        let s_max = svd.singular_values.iter().cloned().fold(0.0, f64::max);
        let cutoff = svd_tolerance * s_max;
        let keep: Vec<usize> = svd
            .singular_values
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > cutoff)
            .map(|(i, _)| i)
            .collect();

        if keep.is_empty() {
            return Err(LsmError::Regression {
                index,
                reason: "design matrix has no singular value above tolerance".to_string(),
            });
        }

        Ok(Self {
            index,
            projector: u.select_columns(keep.iter()),
            singular_values: svd.singular_values.clone(),
        })
    }

    /// Numerical rank retained after truncation
    pub fn rank(&self) -> usize {
        self.projector.ncols()
    }

    pub fn singular_values(&self) -> &DVector<f64> {
        &self.singular_values
    }

    pub fn is_rank_deficient(&self) -> bool {
        self.rank() < self.singular_values.len()
    }

    fn project(&self, y: &DVector<f64>) -> DVector<f64> {
        let coefficients = self.projector.tr_mul(y);
        &self.projector * coefficients
    }

    /// Regress `target` and keep the fit inside the target's range
    pub fn solve(&self, target: &[f64], stabilization: &Stabilization) -> LsmResult<Fit> {
        if target.len() != self.projector.nrows() {
            return Err(LsmError::Regression {
                index: self.index,
                reason: format!(
                    "target has {} values for {} paths",
                    target.len(),
                    self.projector.nrows()
                ),
            });
        }

        let lo = target.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = target.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        // Degenerate range: nothing to regress
        if !(hi > lo) {
            return Ok(Fit {
                values: vec![lo; target.len()],
                rounds: 0,
                initial_violation: 0.0,
            });
        }

        let range = hi - lo;
        let violation = |fitted: &DVector<f64>| {
            fitted
                .iter()
                .map(|&v| (lo - v).max(v - hi).max(0.0))
                .fold(0.0, f64::max)
                / range
        };

        let mut fitted = self.project(&DVector::from_column_slice(target));
        let initial_violation = violation(&fitted);
        let mut worst = initial_violation;
        let mut rounds = 0;

        while worst >= stabilization.tolerance && rounds < stabilization.max_iterations {
            let clamped = fitted.map(|v| v.clamp(lo, hi));
            fitted = self.project(&clamped);
            worst = violation(&fitted);
            rounds += 1;
        }

        if rounds > 0 {
            log::debug!(
                "partition {}: stabilised regression in {} rounds (violation {:.3e} -> {:.3e})",
                self.index,
                rounds,
                initial_violation,
                worst
            );
        }

        Ok(Fit {
            values: fitted.iter().map(|v| v.clamp(lo, hi)).collect(),
            rounds,
            initial_violation,
        })
    }
}
