//! Error types for the valuation engine

use chrono::NaiveDate;
use thiserror::Error;

use crate::market::Currency;

/// Result alias used throughout the crate
pub type LsmResult<T> = Result<T, LsmError>;

/// Errors raised while validating inputs or running a valuation
///
/// Every variant is fatal for the valuation in progress: there is no
/// partial-success model, a failure in any path or date worker aborts the run.
#[derive(Error, Debug)]
pub enum LsmError {
    /// A supplied call or put evaluator has no exercise dates
    #[error("Invalid {side} evaluator: {reason}")]
    InvalidEvaluator {
        /// Which leg was rejected ("call" or "put")
        side: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Report dates or an evaluator were supplied without a basis-function set
    #[error("Basis functions are required when {reason}")]
    MissingBasisFunctions {
        /// What made the basis set mandatory
        reason: &'static str,
    },

    /// More regressors than simulated paths
    #[error("Under-determined regression: basis dimension {dimension} exceeds path count {paths}")]
    UnderdeterminedRegression {
        /// Basis dimension
        dimension: usize,
        /// Number of simulated paths
        paths: usize,
    },

    /// The simulation engine could not produce a path handle
    #[error("Simulation engine returned no path for index {index}")]
    MissingPath {
        /// Requested path index
        index: usize,
    },

    /// No discount curve is available for the numeraire currency
    #[error("Missing discount curve for {currency}")]
    MissingDiscountCurve {
        /// Currency of the missing curve
        currency: Currency,
    },

    /// A floating coupon references a forward curve that does not exist
    #[error("Missing forward curve '{id}'")]
    MissingForwardCurve {
        /// Identifier of the missing curve
        id: String,
    },

    /// The instrument references a credit curve that does not exist
    #[error("Missing credit curve '{id}'")]
    MissingCreditCurve {
        /// Identifier of the missing curve
        id: String,
    },

    /// No FX rate is quoted for a required currency pair
    #[error("Missing FX rate {base}/{quote}")]
    MissingFxRate {
        /// Base currency
        base: Currency,
        /// Quote currency
        quote: Currency,
    },

    /// A schedule is malformed (pay before reset, unsorted dates, ...)
    #[error("Invalid schedule at {date}: {reason}")]
    InvalidSchedule {
        /// Offending date
        date: NaiveDate,
        /// Description of the problem
        reason: String,
    },

    /// Any other invalid input parameter
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Description of the invalid input
        reason: String,
    },

    /// The regression could not be factorised or solved
    #[error("Regression failed at partition {index}: {reason}")]
    Regression {
        /// Partition index of the failing regression
        index: usize,
        /// Description of the failure
        reason: String,
    },

    /// IO failure while reading inputs or writing outputs
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse or write failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parse or write failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LsmError {
    /// Creates an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates an invalid schedule error
    pub fn invalid_schedule(date: NaiveDate, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            date,
            reason: reason.into(),
        }
    }
}
