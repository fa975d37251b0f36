//! Date arithmetic helpers
//!
//! All year fractions in the engine are ACT/365 fixed, measured from the
//! valuation date of the simulation.

use chrono::{Datelike, Months, NaiveDate};

/// Days per year under ACT/365F
const DAYS_PER_YEAR: f64 = 365.0;

/// ACT/365F year fraction between two dates (negative if `to < from`)
pub fn year_fraction(from: NaiveDate, to: NaiveDate) -> f64 {
    (to - from).num_days() as f64 / DAYS_PER_YEAR
}

/// Add a number of months, clamping to month end when the day does not exist
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or_else(|| end_of_month(date))
}

/// Add a number of whole years (Feb 29 rolls to Feb 28)
pub fn add_years(date: NaiveDate, years: u32) -> NaiveDate {
    add_months(date, years * 12)
}

/// Regular schedule of dates every `step_months`, starting one step after
/// `start` and ending on or before `end`
pub fn periodic_dates(start: NaiveDate, end: NaiveDate, step_months: u32) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    if step_months == 0 {
        return dates;
    }

    let mut k = 1;
    loop {
        let date = add_months(start, step_months * k);
        if date > end {
            break;
        }
        dates.push(date);
        k += 1;
    }

    dates
}

fn end_of_month(date: NaiveDate) -> NaiveDate {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}
