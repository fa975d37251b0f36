//! Load cashflow schedules from CSV
//!
//! Columns: `ResetDate,PayDate,Kind,Amount,Spread`. `Kind` is one of
//! `Fixed`, `Floating` or `Notional`; for floating rows `Amount` is the
//! notional the rate accrues on and `Spread` is added to the projected rate.

use chrono::NaiveDate;
use csv::Reader;
use std::path::Path;

use super::cashflow::{CashflowNode, CashflowStream, CouponKind};
use crate::error::{LsmError, LsmResult};
use crate::market::Currency;

/// Raw CSV row matching the schedule columns
#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    #[serde(rename = "ResetDate")]
    reset_date: NaiveDate,
    #[serde(rename = "PayDate")]
    pay_date: NaiveDate,
    #[serde(rename = "Kind")]
    kind: String,
    #[serde(rename = "Amount")]
    amount: f64,
    #[serde(rename = "Spread", default)]
    spread: Option<f64>,
}

impl CsvRow {
    fn to_node(self, forward_curve: Option<&str>) -> LsmResult<CashflowNode> {
        let kind = match self.kind.as_str() {
            "Fixed" => CouponKind::Fixed { amount: self.amount },
            "Notional" => CouponKind::Notional { amount: self.amount },
            "Floating" => {
                let curve = forward_curve.ok_or_else(|| {
                    LsmError::invalid_schedule(self.reset_date, "floating row without a forward curve")
                })?;
                CouponKind::Floating {
                    forward_curve: curve.to_string(),
                    notional: self.amount,
                    spread: self.spread.unwrap_or(0.0),
                }
            }
            other => {
                return Err(LsmError::invalid_schedule(
                    self.pay_date,
                    format!("unknown cashflow kind: {}", other),
                ))
            }
        };

        Ok(CashflowNode {
            reset_date: self.reset_date,
            pay_date: self.pay_date,
            kind,
        })
    }
}

/// Load a schedule from a CSV file
pub fn load_schedule<P: AsRef<Path>>(
    path: P,
    currency: Currency,
    forward_curve: Option<&str>,
) -> LsmResult<CashflowStream> {
    let file = std::fs::File::open(path)?;
    load_schedule_from_reader(file, currency, forward_curve)
}

/// Load a schedule from any reader (e.g., string buffer, network stream)
pub fn load_schedule_from_reader<R: std::io::Read>(
    reader: R,
    currency: Currency,
    forward_curve: Option<&str>,
) -> LsmResult<CashflowStream> {
    let mut csv_reader = Reader::from_reader(reader);
    let mut nodes = Vec::new();

    for result in csv_reader.deserialize() {
        let row: CsvRow = result?;
        nodes.push(row.to_node(forward_curve)?);
    }

    CashflowStream::from_nodes(currency, nodes)
}
