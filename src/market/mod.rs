//! Market environment consumed by the simulation engine
//!
//! Holds the ordered curve sets and FX quotes a path is evolved through.
//! Construction and validation of a production market (curve bootstrapping,
//! FX triangulation) happen upstream; this module only provides the state the
//! engine reads and the simulation mutates.

mod curve;

pub use curve::{CreditCurve, CurveState, FactorLoading, YieldCurve};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LsmError, LsmResult};

/// ISO currency codes supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
    GBP,
    JPY,
    CHF,
    CAD,
    AUD,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::CHF => "CHF",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
        };
        f.write_str(code)
    }
}

impl std::str::FromStr for Currency {
    type Err = LsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "JPY" => Ok(Currency::JPY),
            "CHF" => Ok(Currency::CHF),
            "CAD" => Ok(Currency::CAD),
            "AUD" => Ok(Currency::AUD),
            other => Err(LsmError::invalid_input(format!("unknown currency '{}'", other))),
        }
    }
}

/// FX quote: units of `quote` per one unit of `base`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub base: Currency,
    pub quote: Currency,
    pub rate: f64,
}

/// Curves and FX quotes for one point in (simulated) time
///
/// `Clone` is a deep copy: every forward-pass worker owns its own clone for
/// the duration of a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEnvironment {
    /// Valuation date of the environment
    as_of: NaiveDate,

    /// Date the environment has been evolved to
    current_date: NaiveDate,

    /// Discount curves; index 0 is the domestic curve
    discount_curves: Vec<YieldCurve>,

    /// Projection curves for floating coupons
    forward_curves: Vec<YieldCurve>,

    /// Issuer credit curves
    credit_curves: Vec<CreditCurve>,

    /// FX quotes
    fx_rates: Vec<FxRate>,
}

impl MarketEnvironment {
    /// Empty environment at a valuation date
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            current_date: as_of,
            discount_curves: Vec::new(),
            forward_curves: Vec::new(),
            credit_curves: Vec::new(),
            fx_rates: Vec::new(),
        }
    }

    /// Add a discount curve (the first one added is the domestic curve)
    pub fn with_discount_curve(mut self, curve: YieldCurve) -> Self {
        self.discount_curves.push(curve);
        self
    }

    /// Add a forward (projection) curve
    pub fn with_forward_curve(mut self, curve: YieldCurve) -> Self {
        self.forward_curves.push(curve);
        self
    }

    /// Add a credit curve
    pub fn with_credit_curve(mut self, curve: CreditCurve) -> Self {
        self.credit_curves.push(curve);
        self
    }

    /// Add an FX quote
    pub fn with_fx_rate(mut self, base: Currency, quote: Currency, rate: f64) -> Self {
        self.set_fx_rate(base, quote, rate);
        self
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Date the environment has been evolved to
    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    pub fn set_current_date(&mut self, date: NaiveDate) {
        self.current_date = date;
    }

    pub fn discount_curves(&self) -> &[YieldCurve] {
        &self.discount_curves
    }

    pub fn discount_curves_mut(&mut self) -> &mut [YieldCurve] {
        &mut self.discount_curves
    }

    pub fn forward_curves(&self) -> &[YieldCurve] {
        &self.forward_curves
    }

    pub fn forward_curves_mut(&mut self) -> &mut [YieldCurve] {
        &mut self.forward_curves
    }

    pub fn credit_curves(&self) -> &[CreditCurve] {
        &self.credit_curves
    }

    pub fn credit_curves_mut(&mut self) -> &mut [CreditCurve] {
        &mut self.credit_curves
    }

    /// Position of the discount curve for a currency
    pub fn discount_curve_index(&self, currency: Currency) -> LsmResult<usize> {
        self.discount_curves
            .iter()
            .position(|c| c.currency() == currency)
            .ok_or(LsmError::MissingDiscountCurve { currency })
    }

    /// Discount curve for a currency
    pub fn discount_curve(&self, currency: Currency) -> LsmResult<&YieldCurve> {
        let index = self.discount_curve_index(currency)?;
        Ok(&self.discount_curves[index])
    }

    /// Position of a forward curve by identifier
    pub fn forward_curve_index(&self, id: &str) -> LsmResult<usize> {
        self.forward_curves
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| LsmError::MissingForwardCurve { id: id.to_string() })
    }

    /// Position of a credit curve by identifier
    pub fn credit_curve_index(&self, id: &str) -> LsmResult<usize> {
        self.credit_curves
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| LsmError::MissingCreditCurve { id: id.to_string() })
    }

    /// Units of `quote` per unit of `base`, using the inverse quote if needed
    pub fn fx_rate(&self, base: Currency, quote: Currency) -> LsmResult<f64> {
        if base == quote {
            return Ok(1.0);
        }

        for fx in &self.fx_rates {
            if fx.base == base && fx.quote == quote {
                return Ok(fx.rate);
            }
            if fx.base == quote && fx.quote == base && fx.rate != 0.0 {
                return Ok(1.0 / fx.rate);
            }
        }

        Err(LsmError::MissingFxRate { base, quote })
    }

    /// Insert or overwrite a quote (an inverse quote is overwritten in place)
    pub fn set_fx_rate(&mut self, base: Currency, quote: Currency, rate: f64) {
        for fx in self.fx_rates.iter_mut() {
            if fx.base == base && fx.quote == quote {
                fx.rate = rate;
                return;
            }
            if fx.base == quote && fx.quote == base && rate != 0.0 {
                fx.rate = 1.0 / rate;
                return;
            }
        }
        self.fx_rates.push(FxRate { base, quote, rate });
    }

    /// Align every yield curve onto the union of all pillar tenors
    pub fn conform(&mut self) {
        let mut grid: Vec<f64> = self
            .discount_curves
            .iter()
            .chain(self.forward_curves.iter())
            .flat_map(|c| c.tenors().iter().copied())
            .collect();
        grid.sort_by(f64::total_cmp);
        grid.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

        for curve in self
            .discount_curves
            .iter_mut()
            .chain(self.forward_curves.iter_mut())
        {
            curve.conform_to(&grid);
        }
    }

    /// Copy with every discount and forward curve shifted in parallel
    pub fn bumped(&self, shift: f64) -> Self {
        let mut market = self.clone();
        for curve in market.discount_curves.iter_mut() {
            *curve = curve.bumped(shift);
        }
        for curve in market.forward_curves.iter_mut() {
            *curve = curve.bumped(shift);
        }
        market
    }
}
