//! Exercise evaluators for the call and put legs
//!
//! An evaluator knows when a leg can be exercised, at what price, and what the
//! exercised leg is worth. The three variants differ only in how that value
//! is obtained:
//!
//! - `CashflowBacked`: the leg delivers its own cashflow stream; its value is
//!   estimated by regression on the simulated flows
//! - `AnalyticFormula`: closed-form value from the market at the exercise date
//! - `PathDependentFunctional`: value depends on market observations made at
//!   notify dates along the path

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LsmError, LsmResult};
use crate::market::{Currency, MarketEnvironment};

use super::cashflow::CashflowStream;

/// Which side holds an exercise right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegSide {
    /// Issuer may redeem the instrument
    Call,
    /// Holder may sell the instrument back
    Put,
}

impl LegSide {
    pub fn label(self) -> &'static str {
        match self {
            LegSide::Call => "call",
            LegSide::Put => "put",
        }
    }
}

/// Exercise dates, prices and settlement shared by every evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSchedule {
    /// Sorted exercise dates
    pub dates: Vec<NaiveDate>,
    /// Strike per exercise date (a single entry applies to every date)
    pub prices: Vec<f64>,
    /// Cash settlement pays the intrinsic value; physical settlement delivers
    /// the exercised leg
    pub cash_settled: bool,
}

impl ExerciseSchedule {
    pub fn new(mut dates: Vec<NaiveDate>, prices: Vec<f64>, cash_settled: bool) -> Self {
        dates.sort();
        dates.dedup();
        Self {
            dates,
            prices,
            cash_settled,
        }
    }

    /// Same strike on every date
    pub fn flat(dates: Vec<NaiveDate>, price: f64, cash_settled: bool) -> Self {
        Self::new(dates, vec![price], cash_settled)
    }

    /// Strike of the latest exercise date on or before `date`, else the first
    pub fn price(&self, date: NaiveDate) -> f64 {
        if self.prices.is_empty() {
            return 0.0;
        }
        let idx = self.dates.partition_point(|d| *d <= date).saturating_sub(1);
        self.prices[idx.min(self.prices.len() - 1)]
    }
}

/// Closed-form exercise values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalyticPayoff {
    /// Fixed redemption amount
    Redemption { amount: f64 },
    /// Zero-coupon bond delivered at exercise, discounted on the currency's curve
    ZeroCouponBond {
        amount: f64,
        maturity: NaiveDate,
        currency: Currency,
    },
}

/// Running average of observed short rates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateObservations {
    sum: f64,
    count: usize,
}

impl RateObservations {
    pub fn observe(&mut self, rate: f64) {
        self.sum += rate;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Call or put exercise evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExerciseEvaluator {
    /// Exercise delivers a cashflow stream valued by regression
    CashflowBacked {
        schedule: ExerciseSchedule,
        stream: CashflowStream,
    },
    /// Exercise value from a closed-form payoff
    AnalyticFormula {
        schedule: ExerciseSchedule,
        payoff: AnalyticPayoff,
    },
    /// `redemption * (1 + participation * average short rate at notify dates)`
    PathDependentFunctional {
        schedule: ExerciseSchedule,
        notify_dates: Vec<NaiveDate>,
        currency: Currency,
        redemption: f64,
        participation: f64,
        #[serde(default)]
        observations: RateObservations,
    },
}

impl ExerciseEvaluator {
    pub fn schedule(&self) -> &ExerciseSchedule {
        match self {
            ExerciseEvaluator::CashflowBacked { schedule, .. }
            | ExerciseEvaluator::AnalyticFormula { schedule, .. }
            | ExerciseEvaluator::PathDependentFunctional { schedule, .. } => schedule,
        }
    }

    pub fn exercise_dates(&self) -> &[NaiveDate] {
        &self.schedule().dates
    }

    pub fn is_cash_settled(&self) -> bool {
        self.schedule().cash_settled
    }

    /// Dates at which the evaluator observes the path
    pub fn notify_dates(&self) -> &[NaiveDate] {
        match self {
            ExerciseEvaluator::PathDependentFunctional { notify_dates, .. } => notify_dates,
            _ => &[],
        }
    }

    /// Whether the exercise value is itself estimated as a conditional expectation
    pub fn value_is_conditional_expectation(&self) -> bool {
        matches!(self, ExerciseEvaluator::CashflowBacked { .. })
    }

    /// Cashflow stream delivered on exercise, if any
    pub fn stream(&self) -> Option<&CashflowStream> {
        match self {
            ExerciseEvaluator::CashflowBacked { stream, .. } => Some(stream),
            _ => None,
        }
    }

    /// Strike applicable at `date`
    pub fn price(&self, date: NaiveDate) -> f64 {
        self.schedule().price(date)
    }

    /// Value of the exercised leg at `date`, in the leg's currency
    pub fn value(&self, date: NaiveDate, env: &MarketEnvironment) -> LsmResult<f64> {
        match self {
            ExerciseEvaluator::CashflowBacked { stream, .. } => stream.present_value(date, env),
            ExerciseEvaluator::AnalyticFormula { payoff, .. } => match payoff {
                AnalyticPayoff::Redemption { amount } => Ok(*amount),
                AnalyticPayoff::ZeroCouponBond {
                    amount,
                    maturity,
                    currency,
                } => {
                    let curve = env.discount_curve(*currency)?;
                    Ok(amount * curve.discount_factor(*maturity))
                }
            },
            ExerciseEvaluator::PathDependentFunctional {
                redemption,
                participation,
                observations,
                ..
            } => Ok(redemption * (1.0 + participation * observations.average())),
        }
    }

    /// Clear path-dependent state before a new path
    pub fn reset(&mut self) {
        if let ExerciseEvaluator::PathDependentFunctional { observations, .. } = self {
            observations.clear();
        }
    }

    /// Record a notify-date observation
    pub fn notify(&mut self, side: LegSide, date: NaiveDate, env: &MarketEnvironment) -> LsmResult<()> {
        if let ExerciseEvaluator::PathDependentFunctional {
            currency,
            observations,
            ..
        } = self
        {
            let curve = env.discount_curve(*currency)?;
            observations.observe(curve.short_rate());
            log::trace!("{} evaluator observed {} on {}", side.label(), curve.short_rate(), date);
        }
        Ok(())
    }

    /// Reject evaluators that can never be exercised
    pub fn validate(&self, side: LegSide) -> LsmResult<()> {
        let schedule = self.schedule();
        if schedule.dates.is_empty() {
            return Err(LsmError::InvalidEvaluator {
                side: side.label(),
                reason: "exercise date list is empty".to_string(),
            });
        }
        if schedule.prices.len() > 1 && schedule.prices.len() != schedule.dates.len() {
            return Err(LsmError::InvalidEvaluator {
                side: side.label(),
                reason: format!(
                    "{} prices for {} exercise dates",
                    schedule.prices.len(),
                    schedule.dates.len()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{CurveState, FactorLoading, YieldCurve};
    use approx::assert_relative_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_price_picks_latest_date() {
        let schedule = ExerciseSchedule::new(vec![date(2026, 1, 1), date(2027, 1, 1)], vec![102.0, 101.0], false);
        assert_eq!(schedule.price(date(2025, 6, 1)), 102.0);
        assert_eq!(schedule.price(date(2026, 1, 1)), 102.0);
        assert_eq!(schedule.price(date(2027, 3, 1)), 101.0);
    }

    #[test]
    fn test_empty_dates_invalid() {
        let evaluator = ExerciseEvaluator::AnalyticFormula {
            schedule: ExerciseSchedule::flat(vec![], 100.0, false),
            payoff: AnalyticPayoff::Redemption { amount: 100.0 },
        };
        assert!(matches!(
            evaluator.validate(LegSide::Call),
            Err(LsmError::InvalidEvaluator { side: "call", .. })
        ));
    }

    #[test]
    fn test_path_dependent_reset_and_notify() {
        let as_of = date(2025, 1, 1);
        let mut env = MarketEnvironment::new(as_of)
            .with_discount_curve(YieldCurve::flat("USD", Currency::USD, as_of, 0.02));
        env.discount_curves_mut()[0].set_state(CurveState {
            reference_date: date(2026, 1, 1),
            time: 1.0,
            deflator: 0.98,
            factor: 0.02,
            loading: FactorLoading::Parallel,
        });

        let mut evaluator = ExerciseEvaluator::PathDependentFunctional {
            schedule: ExerciseSchedule::flat(vec![date(2027, 1, 1)], 0.0, true),
            notify_dates: vec![date(2026, 1, 1)],
            currency: Currency::USD,
            redemption: 100.0,
            participation: 10.0,
            observations: RateObservations::default(),
        };

        evaluator.notify(LegSide::Put, date(2026, 1, 1), &env).unwrap();
        let value = evaluator.value(date(2027, 1, 1), &env).unwrap();
        assert_relative_eq!(value, 100.0 * (1.0 + 10.0 * 0.04), epsilon = 1e-8);

        evaluator.reset();
        assert_relative_eq!(evaluator.value(date(2027, 1, 1), &env).unwrap(), 100.0);
    }

    #[test]
    fn test_zero_coupon_bond_value() {
        let as_of = date(2025, 1, 1);
        let maturity = date(2028, 1, 1);
        let mut env = MarketEnvironment::new(as_of)
            .with_discount_curve(YieldCurve::flat("EUR", Currency::EUR, as_of, 0.02));
        let evaluator = ExerciseEvaluator::AnalyticFormula {
            schedule: ExerciseSchedule::flat(vec![date(2026, 1, 1)], 0.0, false),
            payoff: AnalyticPayoff::ZeroCouponBond {
                amount: 100.0,
                maturity,
                currency: Currency::EUR,
            },
        };

        // P(0, 3y) at the origin
        let at_origin = evaluator.value(as_of, &env).unwrap();
        assert_relative_eq!(at_origin, 100.0 * (-0.06_f64).exp(), epsilon = 1e-10);

        // P(1y, 3y) after a parallel move of 1%
        env.discount_curves_mut()[0].set_state(CurveState {
            reference_date: date(2026, 1, 1),
            time: 1.0,
            deflator: 0.97,
            factor: 0.01,
            loading: FactorLoading::Parallel,
        });
        let expected = 100.0 * env.discount_curves()[0].discount_factor(maturity);
        assert_relative_eq!(evaluator.value(date(2026, 1, 1), &env).unwrap(), expected);
        assert_relative_eq!(expected, 100.0 * (-0.06_f64).exp(), epsilon = 1e-10);

        let usd_only = MarketEnvironment::new(as_of)
            .with_discount_curve(YieldCurve::flat("USD", Currency::USD, as_of, 0.02));
        assert!(matches!(
            evaluator.value(as_of, &usd_only),
            Err(LsmError::MissingDiscountCurve { currency: Currency::EUR })
        ));
    }

    #[test]
    fn test_cashflow_backed_flags() {
        let stream = CashflowStream::new(Currency::USD).with_notional(date(2027, 1, 1), 100.0);
        let evaluator = ExerciseEvaluator::CashflowBacked {
            schedule: ExerciseSchedule::flat(vec![date(2026, 1, 1)], 0.0, false),
            stream,
        };
        assert!(evaluator.value_is_conditional_expectation());
        assert!(evaluator.stream().is_some());
        assert!(evaluator.notify_dates().is_empty());
    }
}
