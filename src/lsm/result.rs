//! Valuation output structures

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::instrument::LegSide;

use super::exposure::ExposureGrid;

/// Exercise decision taken on one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseRecord {
    /// Partition index of the exercise date
    pub index: usize,
    pub date: NaiveDate,
    pub direction: LegSide,
}

/// Run statistics returned alongside the price
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationDiagnostics {
    pub paths: usize,
    pub partition_len: usize,
    pub basis_dimension: usize,
    /// Dates with a factorised design matrix
    pub regression_dates: usize,
    /// Dates whose design matrix was truncated by the SVD tolerance
    pub rank_deficient_dates: usize,
    /// Total box re-projection rounds over all solves
    pub stabilization_rounds: usize,
    /// Worst raw violation relative to the target range
    pub max_initial_violation: f64,
    pub call_exercises: usize,
    pub put_exercises: usize,
    /// Partition index of the last exercise date (0 when none)
    pub last_exercise_index: usize,
}

/// Result of one valuation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Valuation {
    /// Fair value in the numeraire currency, scaled by notional
    pub price: f64,

    /// Exposure grid `[path][report date]` when report dates were requested
    pub exposures: Option<ExposureGrid>,

    /// Deflated value carried to the valuation date on each path (per unit notional)
    pub path_values: Vec<f64>,

    /// Exercise decision per path
    pub exercise: Vec<Option<ExerciseRecord>>,

    pub diagnostics: ValuationDiagnostics,
}

impl Valuation {
    /// Fraction of paths exercised on either side
    pub fn exercise_probability(&self) -> f64 {
        if self.exercise.is_empty() {
            return 0.0;
        }
        self.exercise.iter().filter(|e| e.is_some()).count() as f64 / self.exercise.len() as f64
    }

    /// Monte Carlo standard error of the price
    pub fn standard_error(&self, notional: f64) -> f64 {
        let n = self.path_values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.path_values.iter().sum::<f64>() / n as f64;
        let variance = self
            .path_values
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        (variance / n as f64).sqrt() * notional.abs()
    }
}
