//! Yield and credit curves with simulation state
//!
//! A [`YieldCurve`] keeps its initial zero-rate pillars (measured from the
//! valuation date) together with a [`CurveState`] that the simulation engine
//! mutates in place as a path is evolved. Discount factors are always
//! expressed from the curve's current reference date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::year_fraction;
use crate::error::{LsmError, LsmResult};

use super::Currency;

/// Mean reversion below which the Gaussian factor is treated as Ho-Lee
const MIN_MEAN_REVERSION: f64 = 1e-8;

/// How the simulated factor deforms the initial curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FactorLoading {
    /// Parallel shift of the zero curve by the factor value
    Parallel,
    /// Hull-White one-factor Gaussian loading
    MeanReverting {
        /// Mean reversion speed `a`
        mean_reversion: f64,
        /// Short-rate volatility `sigma`
        volatility: f64,
    },
}

impl Default for FactorLoading {
    fn default() -> Self {
        FactorLoading::Parallel
    }
}

impl FactorLoading {
    /// Loading `B(t, T)` of the factor on the log discount factor
    fn loading(&self, tau: f64) -> f64 {
        match *self {
            FactorLoading::Parallel => tau,
            FactorLoading::MeanReverting { mean_reversion: a, .. } => {
                if a.abs() < MIN_MEAN_REVERSION {
                    tau
                } else {
                    (1.0 - (-a * tau).exp()) / a
                }
            }
        }
    }

    /// Variance term `V(t, T)` of the integrated short rate
    fn variance(&self, tau: f64) -> f64 {
        match *self {
            FactorLoading::Parallel => 0.0,
            FactorLoading::MeanReverting {
                mean_reversion: a,
                volatility: sigma,
            } => {
                if a.abs() < MIN_MEAN_REVERSION {
                    sigma * sigma * tau.powi(3) / 3.0
                } else {
                    sigma * sigma / (a * a)
                        * (tau + 2.0 / a * (-a * tau).exp()
                            - 0.5 / a * (-2.0 * a * tau).exp()
                            - 1.5 / a)
                }
            }
        }
    }

    /// Convexity part of the integrated drift, `∫φ(s)ds + ln P(0,t)`
    pub fn drift_convexity(&self, t: f64) -> f64 {
        match *self {
            FactorLoading::Parallel => 0.0,
            FactorLoading::MeanReverting {
                mean_reversion: a,
                volatility: sigma,
            } => {
                if a.abs() < MIN_MEAN_REVERSION {
                    sigma * sigma * t.powi(3) / 6.0
                } else {
                    sigma * sigma / (2.0 * a * a)
                        * (t - 2.0 * (1.0 - (-a * t).exp()) / a
                            + (1.0 - (-2.0 * a * t).exp()) / (2.0 * a))
                }
            }
        }
    }

    /// Multiplicative adjustment of `P(0,T)/P(0,t)` given factor value `x`
    fn adjustment(&self, t: f64, big_t: f64, x: f64) -> f64 {
        let tau = big_t - t;
        match self {
            FactorLoading::Parallel => (-x * tau).exp(),
            FactorLoading::MeanReverting { .. } => {
                let convexity =
                    0.5 * (self.variance(tau) - self.variance(big_t) + self.variance(t));
                (convexity - self.loading(tau) * x).exp()
            }
        }
    }
}

/// Simulation state of a curve along one path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveState {
    /// Date the curve currently stands at
    pub reference_date: NaiveDate,

    /// Year fraction from the curve origin to the reference date
    pub time: f64,

    /// Path deflator from the origin to the reference date (1.0 at origin)
    pub deflator: f64,

    /// Current value of the driving factor
    pub factor: f64,

    /// Deformation applied to the initial curve
    pub loading: FactorLoading,
}

impl CurveState {
    /// Unevolved state at the curve origin
    pub fn at_origin(origin: NaiveDate) -> Self {
        Self {
            reference_date: origin,
            time: 0.0,
            deflator: 1.0,
            factor: 0.0,
            loading: FactorLoading::Parallel,
        }
    }
}

/// Continuously-compounded zero curve with linear interpolation on rates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "YieldCurveData")]
pub struct YieldCurve {
    id: String,
    currency: Currency,
    origin: NaiveDate,
    tenors: Vec<f64>,
    zero_rates: Vec<f64>,
    state: CurveState,
}

/// Serialised form of a curve, checked by `YieldCurve::new` on load
#[derive(Deserialize)]
struct YieldCurveData {
    id: String,
    currency: Currency,
    origin: NaiveDate,
    tenors: Vec<f64>,
    zero_rates: Vec<f64>,
    #[serde(default)]
    state: Option<CurveState>,
}

impl TryFrom<YieldCurveData> for YieldCurve {
    type Error = LsmError;

    fn try_from(data: YieldCurveData) -> LsmResult<Self> {
        let mut curve = YieldCurve::new(data.id, data.currency, data.origin, data.tenors, data.zero_rates)?;
        if let Some(state) = data.state {
            curve.state = state;
        }
        Ok(curve)
    }
}

impl YieldCurve {
    /// Build a curve from pillar tenors (years) and zero rates
    pub fn new(
        id: impl Into<String>,
        currency: Currency,
        origin: NaiveDate,
        tenors: Vec<f64>,
        zero_rates: Vec<f64>,
    ) -> LsmResult<Self> {
        if tenors.is_empty() || tenors.len() != zero_rates.len() {
            return Err(LsmError::invalid_input(format!(
                "curve needs matching non-empty tenors and rates (got {} and {})",
                tenors.len(),
                zero_rates.len()
            )));
        }
        if tenors.windows(2).any(|w| w[1] <= w[0]) || tenors[0] <= 0.0 {
            return Err(LsmError::invalid_input(
                "curve tenors must be positive and strictly increasing",
            ));
        }

        Ok(Self {
            id: id.into(),
            currency,
            origin,
            tenors,
            zero_rates,
            state: CurveState::at_origin(origin),
        })
    }

    /// Flat curve at a single continuously-compounded rate
    pub fn flat(id: impl Into<String>, currency: Currency, origin: NaiveDate, rate: f64) -> Self {
        Self {
            id: id.into(),
            currency,
            origin,
            tenors: vec![1.0],
            zero_rates: vec![rate],
            state: CurveState::at_origin(origin),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn origin(&self) -> NaiveDate {
        self.origin
    }

    pub fn tenors(&self) -> &[f64] {
        &self.tenors
    }

    pub fn state(&self) -> &CurveState {
        &self.state
    }

    /// Replace the simulation state (used by simulation engines)
    pub fn set_state(&mut self, state: CurveState) {
        self.state = state;
    }

    /// Date the curve currently stands at
    pub fn reference_date(&self) -> NaiveDate {
        self.state.reference_date
    }

    /// Path deflator from the origin to the reference date
    pub fn deflator(&self) -> f64 {
        self.state.deflator
    }

    /// Initial zero rate at time `t` (flat extrapolation at both ends)
    pub fn zero_rate(&self, t: f64) -> f64 {
        let n = self.tenors.len();
        if t <= self.tenors[0] {
            return self.zero_rates[0];
        }
        if t >= self.tenors[n - 1] {
            return self.zero_rates[n - 1];
        }

        let i = self.tenors.partition_point(|&x| x <= t);
        let (t0, t1) = (self.tenors[i - 1], self.tenors[i]);
        let (z0, z1) = (self.zero_rates[i - 1], self.zero_rates[i]);
        z0 + (z1 - z0) * (t - t0) / (t1 - t0)
    }

    /// Initial discount factor `P(0, t)`
    pub fn base_discount(&self, t: f64) -> f64 {
        if t <= 0.0 {
            1.0
        } else {
            (-self.zero_rate(t) * t).exp()
        }
    }

    /// Discount factor from the reference date to time `big_t` (years from origin)
    pub fn discount_at_time(&self, big_t: f64) -> f64 {
        let t = self.state.time;
        if big_t <= t {
            return 1.0;
        }
        let ratio = self.base_discount(big_t) / self.base_discount(t);
        ratio * self.state.loading.adjustment(t, big_t, self.state.factor)
    }

    /// Discount factor from the reference date to `date`
    pub fn discount_factor(&self, date: NaiveDate) -> f64 {
        self.discount_at_time(year_fraction(self.origin, date))
    }

    /// Zero rate seen from the reference date for a given tenor
    pub fn current_zero_rate(&self, tenor: f64) -> f64 {
        if tenor <= 0.0 {
            return self.current_zero_rate(1.0 / 365.0);
        }
        -self.discount_at_time(self.state.time + tenor).ln() / tenor
    }

    /// Overnight rate seen from the reference date
    pub fn short_rate(&self) -> f64 {
        self.current_zero_rate(1.0 / 365.0)
    }

    /// Simple forward rate between two dates, seen from the reference date
    pub fn forward_rate(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        let accrual = year_fraction(start, end);
        if accrual <= 0.0 {
            return 0.0;
        }
        (self.discount_factor(start) / self.discount_factor(end) - 1.0) / accrual
    }

    /// Re-interpolate the initial zero rates onto a new pillar grid
    pub fn conform_to(&mut self, grid: &[f64]) {
        if grid.is_empty() || grid == self.tenors.as_slice() {
            return;
        }
        let rates: Vec<f64> = grid.iter().map(|&t| self.zero_rate(t)).collect();
        self.tenors = grid.to_vec();
        self.zero_rates = rates;
    }

    /// Copy of the curve with every zero rate shifted by `shift`
    pub fn bumped(&self, shift: f64) -> Self {
        let mut curve = self.clone();
        for rate in curve.zero_rates.iter_mut() {
            *rate += shift;
        }
        curve
    }
}

/// Flat-hazard credit curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditCurve {
    id: String,
    origin: NaiveDate,
    hazard_rate: f64,
    recovery: f64,
    reference_date: NaiveDate,
}

impl CreditCurve {
    pub fn new(id: impl Into<String>, origin: NaiveDate, hazard_rate: f64, recovery: f64) -> Self {
        Self {
            id: id.into(),
            origin,
            hazard_rate,
            recovery,
            reference_date: origin,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hazard_rate(&self) -> f64 {
        self.hazard_rate
    }

    pub fn recovery(&self) -> f64 {
        self.recovery
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// Move the curve to a new reference date
    pub fn set_reference_date(&mut self, date: NaiveDate) {
        self.reference_date = date;
    }

    /// Survival probability from the origin to `date`
    pub fn survival(&self, date: NaiveDate) -> f64 {
        let t = year_fraction(self.origin, date).max(0.0);
        (-self.hazard_rate * t).exp()
    }

    /// Risky discount multiplier including recovery on default
    pub fn risky_factor(&self, date: NaiveDate) -> f64 {
        let q = self.survival(date);
        q + (1.0 - q) * self.recovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn origin() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn test_flat_curve_discount() {
        let curve = YieldCurve::flat("USD-OIS", Currency::USD, origin(), 0.03);
        let df = curve.discount_at_time(2.0);
        assert_relative_eq!(df, (-0.06_f64).exp(), epsilon = 1e-14);
        assert_relative_eq!(curve.discount_at_time(0.0), 1.0);
    }

    #[test]
    fn test_interpolation_flat_extrapolation() {
        let curve = YieldCurve::new(
            "c",
            Currency::USD,
            origin(),
            vec![1.0, 2.0, 5.0],
            vec![0.01, 0.02, 0.03],
        )
        .unwrap();

        assert_relative_eq!(curve.zero_rate(0.5), 0.01);
        assert_relative_eq!(curve.zero_rate(1.5), 0.015, epsilon = 1e-14);
        assert_relative_eq!(curve.zero_rate(10.0), 0.03);
    }

    #[test]
    fn test_invalid_curve_rejected() {
        assert!(YieldCurve::new("c", Currency::USD, origin(), vec![2.0, 1.0], vec![0.01, 0.02]).is_err());
        assert!(YieldCurve::new("c", Currency::USD, origin(), vec![1.0], vec![]).is_err());
    }

    #[test]
    fn test_deserialize_validates_pillars() {
        let empty = r#"{"id": "c", "currency": "USD", "origin": "2025-01-01", "tenors": [], "zero_rates": []}"#;
        assert!(serde_json::from_str::<YieldCurve>(empty).is_err());

        let unsorted = r#"{"id": "c", "currency": "USD", "origin": "2025-01-01", "tenors": [2.0, 1.0], "zero_rates": [0.01, 0.02]}"#;
        assert!(serde_json::from_str::<YieldCurve>(unsorted).is_err());

        let curve: YieldCurve = serde_json::from_str(
            r#"{"id": "c", "currency": "USD", "origin": "2025-01-01", "tenors": [1.0, 5.0], "zero_rates": [0.01, 0.05]}"#,
        )
        .unwrap();
        assert_eq!(curve.state(), &CurveState::at_origin(origin()));
        assert_relative_eq!(curve.zero_rate(3.0), 0.03, epsilon = 1e-14);
    }

    #[test]
    fn test_serialized_state_survives_reload() {
        let mut curve = YieldCurve::flat("c", Currency::USD, origin(), 0.02);
        curve.set_state(CurveState {
            reference_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            time: 1.0,
            deflator: 0.97,
            factor: 0.01,
            loading: FactorLoading::Parallel,
        });
        let json = serde_json::to_string(&curve).unwrap();
        let reloaded: YieldCurve = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.state(), curve.state());
        assert_eq!(reloaded.tenors(), curve.tenors());
    }

    #[test]
    fn test_parallel_state_shifts_forward_discount() {
        let mut curve = YieldCurve::flat("c", Currency::USD, origin(), 0.02);
        curve.set_state(CurveState {
            reference_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            time: 1.0,
            deflator: 0.97,
            factor: 0.01,
            loading: FactorLoading::Parallel,
        });

        // P(1, 3) = exp(-0.02 * 2) * exp(-0.01 * 2)
        assert_relative_eq!(curve.discount_at_time(3.0), (-0.06_f64).exp(), epsilon = 1e-14);
        assert_relative_eq!(curve.short_rate(), 0.03, epsilon = 1e-10);
    }

    #[test]
    fn test_hull_white_zero_factor_is_close_to_forward() {
        let mut curve = YieldCurve::flat("c", Currency::USD, origin(), 0.02);
        curve.set_state(CurveState {
            reference_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            time: 1.0,
            deflator: 1.0,
            factor: 0.0,
            loading: FactorLoading::MeanReverting {
                mean_reversion: 0.05,
                volatility: 0.01,
            },
        });

        // Convexity is second order in sigma
        let df = curve.discount_at_time(3.0);
        assert!((df - (-0.04_f64).exp()).abs() < 1e-3);
    }

    #[test]
    fn test_conform_preserves_rates() {
        let mut curve = YieldCurve::new(
            "c",
            Currency::USD,
            origin(),
            vec![1.0, 5.0],
            vec![0.01, 0.05],
        )
        .unwrap();
        curve.conform_to(&[1.0, 2.0, 3.0, 5.0]);
        assert_eq!(curve.tenors().len(), 4);
        assert_relative_eq!(curve.zero_rate(2.0), 0.02, epsilon = 1e-14);
    }

    #[test]
    fn test_credit_survival() {
        let curve = CreditCurve::new("ACME", origin(), 0.02, 0.4);
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_relative_eq!(curve.survival(date), (-0.02_f64).exp(), epsilon = 1e-14);
        assert!(curve.risky_factor(date) > curve.survival(date));
    }
}
