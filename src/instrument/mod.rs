//! Instrument description: underlying cashflows plus optional exercise rights

pub mod basis;
pub mod cashflow;
pub mod exercise;
pub mod loader;

pub use basis::{BasisFunctions, PathAverageBasis, PolynomialBasis, StateFactor};
pub use cashflow::{CashflowNode, CashflowStream, CouponKind};
pub use exercise::{AnalyticPayoff, ExerciseEvaluator, ExerciseSchedule, LegSide, RateObservations};
pub use loader::{load_schedule, load_schedule_from_reader};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::market::Currency;

/// Callable, putable or game instrument on an underlying cashflow stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Scaling applied to every reported value
    pub notional: f64,

    /// Cashflows received while the instrument is alive
    pub underlying: CashflowStream,

    /// Issuer's redemption right
    pub call: Option<ExerciseEvaluator>,

    /// Holder's put-back right
    pub put: Option<ExerciseEvaluator>,

    /// Issuer credit curve applied to the underlying flows
    pub credit_curve: Option<String>,
}

impl Instrument {
    /// Instrument without exercise rights
    pub fn new(notional: f64, underlying: CashflowStream) -> Self {
        Self {
            notional,
            underlying,
            call: None,
            put: None,
            credit_curve: None,
        }
    }

    pub fn with_call(mut self, call: ExerciseEvaluator) -> Self {
        self.call = Some(call);
        self
    }

    pub fn with_put(mut self, put: ExerciseEvaluator) -> Self {
        self.put = Some(put);
        self
    }

    pub fn with_credit_curve(mut self, id: impl Into<String>) -> Self {
        self.credit_curve = Some(id.into());
        self
    }

    /// Currency the underlying is denominated in
    pub fn natural_currency(&self) -> Currency {
        self.underlying.currency()
    }

    /// Evaluator for one side
    pub fn leg(&self, side: LegSide) -> Option<&ExerciseEvaluator> {
        match side {
            LegSide::Call => self.call.as_ref(),
            LegSide::Put => self.put.as_ref(),
        }
    }

    pub fn has_optionality(&self) -> bool {
        self.call.is_some() || self.put.is_some()
    }

    /// Last underlying pay date
    pub fn maturity(&self) -> Option<NaiveDate> {
        self.underlying.last_pay_date()
    }
}
