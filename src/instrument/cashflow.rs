//! Cashflow streams: fixed coupons, floating coupons and notional exchanges

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::{periodic_dates, year_fraction};
use crate::error::{LsmError, LsmResult};
use crate::market::{Currency, MarketEnvironment};

/// How the amount of a cashflow is determined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CouponKind {
    /// Known amount
    Fixed { amount: f64 },
    /// `notional * (forward + spread) * accrual`, fixed on the reset date
    Floating {
        forward_curve: String,
        notional: f64,
        spread: f64,
    },
    /// Exchange of principal
    Notional { amount: f64 },
}

/// One cashflow of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashflowNode {
    /// Date the amount becomes known
    pub reset_date: NaiveDate,
    /// Date the amount is paid
    pub pay_date: NaiveDate,
    pub kind: CouponKind,
}

impl CashflowNode {
    /// Amount paid, using the market as it stands on the reset date
    pub fn fix(&self, env: &MarketEnvironment) -> LsmResult<f64> {
        match &self.kind {
            CouponKind::Fixed { amount } | CouponKind::Notional { amount } => Ok(*amount),
            CouponKind::Floating {
                forward_curve,
                notional,
                spread,
            } => {
                let index = env.forward_curve_index(forward_curve)?;
                let curve = &env.forward_curves()[index];
                let accrual = year_fraction(self.reset_date, self.pay_date);
                let forward = curve.forward_rate(self.reset_date, self.pay_date);
                Ok(notional * (forward + spread) * accrual)
            }
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self.kind, CouponKind::Floating { .. })
    }
}

/// Ordered cashflows in a single currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashflowStream {
    currency: Currency,
    nodes: Vec<CashflowNode>,
}

impl CashflowStream {
    /// Empty stream
    pub fn new(currency: Currency) -> Self {
        Self {
            currency,
            nodes: Vec::new(),
        }
    }

    /// Build from nodes, validating and sorting by pay date
    pub fn from_nodes(currency: Currency, mut nodes: Vec<CashflowNode>) -> LsmResult<Self> {
        for node in &nodes {
            if node.pay_date < node.reset_date {
                return Err(LsmError::invalid_schedule(
                    node.pay_date,
                    format!("pay date precedes reset date {}", node.reset_date),
                ));
            }
        }
        nodes.sort_by_key(|n| (n.pay_date, n.reset_date));
        Ok(Self { currency, nodes })
    }

    /// Fixed-rate bullet bond: periodic coupons plus redemption at maturity
    pub fn fixed_rate_bond(
        currency: Currency,
        issue: NaiveDate,
        maturity: NaiveDate,
        step_months: u32,
        coupon: f64,
        face: f64,
    ) -> LsmResult<Self> {
        if maturity <= issue {
            return Err(LsmError::invalid_schedule(maturity, "maturity must follow issue"));
        }
        let mut dates = periodic_dates(issue, maturity, step_months);
        if dates.last() != Some(&maturity) {
            dates.push(maturity);
        }

        let mut stream = Self::new(currency);
        let mut start = issue;
        for pay in dates {
            stream = stream.with_fixed(start, pay, coupon);
            start = pay;
        }
        Ok(stream.with_notional(maturity, face))
    }

    /// Add a fixed coupon
    pub fn with_fixed(mut self, reset_date: NaiveDate, pay_date: NaiveDate, amount: f64) -> Self {
        self.push(CashflowNode {
            reset_date,
            pay_date,
            kind: CouponKind::Fixed { amount },
        });
        self
    }

    /// Add a floating coupon projected from a forward curve
    pub fn with_floating(
        mut self,
        reset_date: NaiveDate,
        pay_date: NaiveDate,
        forward_curve: impl Into<String>,
        notional: f64,
        spread: f64,
    ) -> Self {
        self.push(CashflowNode {
            reset_date,
            pay_date,
            kind: CouponKind::Floating {
                forward_curve: forward_curve.into(),
                notional,
                spread,
            },
        });
        self
    }

    /// Add a principal exchange
    pub fn with_notional(mut self, pay_date: NaiveDate, amount: f64) -> Self {
        self.push(CashflowNode {
            reset_date: pay_date,
            pay_date,
            kind: CouponKind::Notional { amount },
        });
        self
    }

    fn push(&mut self, node: CashflowNode) {
        let pos = self
            .nodes
            .partition_point(|n| (n.pay_date, n.reset_date) <= (node.pay_date, node.reset_date));
        self.nodes.insert(pos, node);
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn nodes(&self) -> &[CashflowNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Last pay date of the stream
    pub fn last_pay_date(&self) -> Option<NaiveDate> {
        self.nodes.iter().map(|n| n.pay_date).max()
    }

    /// Value at the environment's current date of the flows paid after `date`,
    /// discounted on the stream currency's curve
    pub fn present_value(&self, date: NaiveDate, env: &MarketEnvironment) -> LsmResult<f64> {
        let curve = env.discount_curve(self.currency)?;
        let mut pv = 0.0;
        for node in self.nodes.iter().filter(|n| n.pay_date > date) {
            pv += node.fix(env)? * curve.discount_factor(node.pay_date);
        }
        Ok(pv)
    }
}
