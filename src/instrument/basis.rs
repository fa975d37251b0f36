//! Regression basis functions
//!
//! A basis set turns the market state on a partition date into a fixed-length
//! vector of regressors. Sets may carry path-dependent accumulators, which
//! are cleared by `reset` before every path.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::{LsmError, LsmResult};
use crate::market::{Currency, MarketEnvironment};

/// Basis-function set used to regress continuation values
pub trait BasisFunctions: Debug + Send + Sync {
    /// Number of regressors produced by `generate`
    fn dimension(&self) -> usize;

    /// Fill `buffer` (of length `dimension()`) with the realisation at `date`
    fn generate(&mut self, date: NaiveDate, env: &MarketEnvironment, buffer: &mut [f64]) -> LsmResult<()>;

    /// Clear path-dependent state
    fn reset(&mut self);

    /// Deep copy for a forward-pass worker
    fn clone_box(&self) -> Box<dyn BasisFunctions>;
}

impl Clone for Box<dyn BasisFunctions> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Observable market quantity used as a regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateFactor {
    /// Overnight rate of a currency's discount curve
    ShortRate { currency: Currency },
    /// Zero rate of a given tenor (years) seen from the current date
    ZeroRate { currency: Currency, tenor: f64 },
    /// FX quote
    Fx { base: Currency, quote: Currency },
}

impl StateFactor {
    pub fn observe(&self, env: &MarketEnvironment) -> LsmResult<f64> {
        match self {
            StateFactor::ShortRate { currency } => Ok(env.discount_curve(*currency)?.short_rate()),
            StateFactor::ZeroRate { currency, tenor } => {
                Ok(env.discount_curve(*currency)?.current_zero_rate(*tenor))
            }
            StateFactor::Fx { base, quote } => env.fx_rate(*base, *quote),
        }
    }
}

fn check_buffer(buffer: &[f64], dimension: usize) -> LsmResult<()> {
    if buffer.len() != dimension {
        return Err(LsmError::invalid_input(format!(
            "basis buffer has length {}, expected {}",
            buffer.len(),
            dimension
        )));
    }
    Ok(())
}

fn fill_powers(x: f64, buffer: &mut [f64]) {
    let mut power = 1.0;
    for slot in buffer.iter_mut() {
        *slot = power;
        power *= x;
    }
}

/// Monomials `1, x, x², ..., x^degree` of one state factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialBasis {
    factor: StateFactor,
    degree: usize,
}

impl PolynomialBasis {
    pub fn new(factor: StateFactor, degree: usize) -> Self {
        Self { factor, degree }
    }
}

impl BasisFunctions for PolynomialBasis {
    fn dimension(&self) -> usize {
        self.degree + 1
    }

    fn generate(&mut self, _date: NaiveDate, env: &MarketEnvironment, buffer: &mut [f64]) -> LsmResult<()> {
        check_buffer(buffer, self.dimension())?;
        let x = self.factor.observe(env)?;
        fill_powers(x, buffer);
        Ok(())
    }

    fn reset(&mut self) {}

    fn clone_box(&self) -> Box<dyn BasisFunctions> {
        Box::new(self.clone())
    }
}

/// Polynomial in the current factor value plus its running path average
///
/// Produces `1, x, ..., x^degree, avg(x)` where the average runs over every
/// date the set has been generated on since the last reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathAverageBasis {
    factor: StateFactor,
    degree: usize,
    #[serde(skip)]
    sum: f64,
    #[serde(skip)]
    count: usize,
}

impl PathAverageBasis {
    pub fn new(factor: StateFactor, degree: usize) -> Self {
        Self {
            factor,
            degree,
            sum: 0.0,
            count: 0,
        }
    }
}

impl BasisFunctions for PathAverageBasis {
    fn dimension(&self) -> usize {
        self.degree + 2
    }

    fn generate(&mut self, _date: NaiveDate, env: &MarketEnvironment, buffer: &mut [f64]) -> LsmResult<()> {
        check_buffer(buffer, self.dimension())?;
        let x = self.factor.observe(env)?;
        self.sum += x;
        self.count += 1;

        let (powers, average) = buffer.split_at_mut(self.degree + 1);
        fill_powers(x, powers);
        average[0] = self.sum / self.count as f64;
        Ok(())
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn clone_box(&self) -> Box<dyn BasisFunctions> {
        Box::new(self.clone())
    }
}
