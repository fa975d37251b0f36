//! Partition: the merged, sorted event schedule of one valuation

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

use crate::dates::year_fraction;
use crate::simulation::GridIndex;

/// Event flags carried by a partition date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionFlags(u8);

impl PartitionFlags {
    pub const CALL_EXERCISE: Self = Self(1 << 0);
    pub const PUT_EXERCISE: Self = Self(1 << 1);
    pub const MTM: Self = Self(1 << 2);
    pub const CALL_VALUE: Self = Self(1 << 3);
    pub const PUT_VALUE: Self = Self(1 << 4);
    pub const CALL_RESET: Self = Self(1 << 5);
    pub const PUT_RESET: Self = Self(1 << 6);
    pub const REPLACE_CASHFLOW: Self = Self(1 << 7);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if any flag of `other` is set
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every flag of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_call_exercise_date(self) -> bool {
        self.intersects(Self::CALL_EXERCISE)
    }

    pub fn is_put_exercise_date(self) -> bool {
        self.intersects(Self::PUT_EXERCISE)
    }

    pub fn is_exercise_date(self) -> bool {
        self.intersects(Self::CALL_EXERCISE | Self::PUT_EXERCISE)
    }

    pub fn is_mtm_date(self) -> bool {
        self.intersects(Self::MTM)
    }

    pub fn is_call_value_date(self) -> bool {
        self.intersects(Self::CALL_VALUE)
    }

    pub fn is_put_value_date(self) -> bool {
        self.intersects(Self::PUT_VALUE)
    }

    /// MtM, call value or put value date
    pub fn is_value_date(self) -> bool {
        self.intersects(Self::MTM | Self::CALL_VALUE | Self::PUT_VALUE)
    }

    pub fn is_call_reset_date(self) -> bool {
        self.intersects(Self::CALL_RESET)
    }

    pub fn is_put_reset_date(self) -> bool {
        self.intersects(Self::PUT_RESET)
    }

    pub fn replaces_cashflow(self) -> bool {
        self.intersects(Self::REPLACE_CASHFLOW)
    }
}

impl BitOr for PartitionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PartitionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One event date of the valuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub date: NaiveDate,
    /// ACT/365F year fraction from the valuation date
    pub time: f64,
    /// Position on the simulation grid
    pub simulation_index: GridIndex,
    /// Column in the report-date list
    pub exposure_index: Option<usize>,
    pub flags: PartitionFlags,
}

/// Exercise-related dates of one leg
#[derive(Debug, Clone, Default)]
pub struct LegDates<'a> {
    pub exercise_dates: &'a [NaiveDate],
    pub notify_dates: &'a [NaiveDate],
    pub replace_cashflow: bool,
}

/// Everything the builder needs to lay out the schedule
#[derive(Debug, Clone)]
pub struct PartitionInputs<'a> {
    pub as_of: NaiveDate,
    /// Sorted report dates; the exposure index is the position in this list
    pub report_dates: &'a [NaiveDate],
    pub last_cashflow_date: Option<NaiveDate>,
    pub call: Option<LegDates<'a>>,
    pub put: Option<LegDates<'a>>,
}

#[derive(Default)]
struct Entry {
    flags: PartitionFlags,
    exposure_index: Option<usize>,
}

/// Merge exercise, notify and report dates into the partition
pub fn build_partition(inputs: &PartitionInputs<'_>, simulation_dates: &[NaiveDate]) -> Vec<Partition> {
    let as_of = inputs.as_of;
    let mut entries: BTreeMap<NaiveDate, Entry> = BTreeMap::new();

    entries.entry(as_of).or_default().flags |= PartitionFlags::MTM;

    let legs = [
        (
            &inputs.call,
            PartitionFlags::CALL_EXERCISE | PartitionFlags::CALL_VALUE,
            PartitionFlags::CALL_RESET,
        ),
        (
            &inputs.put,
            PartitionFlags::PUT_EXERCISE | PartitionFlags::PUT_VALUE,
            PartitionFlags::PUT_RESET,
        ),
    ];

    for (leg, exercise_flags, reset_flag) in legs {
        let Some(leg) = leg else { continue };

        let mut flags = exercise_flags;
        if leg.replace_cashflow {
            flags |= PartitionFlags::REPLACE_CASHFLOW;
        }
        for &date in leg.exercise_dates.iter().filter(|d| **d >= as_of) {
            entries.entry(date).or_default().flags |= flags;
        }
        for &date in leg.notify_dates.iter().filter(|d| **d >= as_of) {
            entries.entry(date).or_default().flags |= reset_flag;
        }
    }

    for (column, &date) in inputs.report_dates.iter().enumerate() {
        if date < as_of {
            continue;
        }
        let covered = inputs.last_cashflow_date.is_some_and(|last| date <= last);
        let entry = entries.entry(date).or_default();
        if covered || entry.flags.intersects(PartitionFlags::CALL_VALUE | PartitionFlags::PUT_VALUE) {
            entry.flags |= PartitionFlags::MTM;
        }
        entry.exposure_index = Some(column);
    }

    let mut partition: Vec<Partition> = entries
        .into_iter()
        .map(|(date, entry)| Partition {
            date,
            time: year_fraction(as_of, date),
            simulation_index: GridIndex::locate(simulation_dates, date),
            exposure_index: entry.exposure_index,
            flags: entry.flags,
        })
        .collect();

    let last_value = partition
        .iter()
        .rposition(|p| p.flags.is_value_date())
        .unwrap_or(0);
    partition.truncate(last_value + 1);

    partition
}

/// Index of the interval `(d_{j-1}, d_j]` containing `date`; `partition.len()`
/// for dates after the last partition date
pub fn bucket_of(partition: &[Partition], date: NaiveDate) -> usize {
    partition.partition_point(|p| p.date < date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sim_dates() -> Vec<NaiveDate> {
        vec![date(2025, 1, 1), date(2026, 1, 1), date(2027, 1, 1), date(2028, 1, 1)]
    }

    #[test]
    fn test_partition_invariants() {
        let calls = [date(2027, 1, 1), date(2026, 1, 1), date(2024, 1, 1)];
        let reports = [date(2025, 1, 1), date(2025, 7, 1), date(2026, 1, 1), date(2030, 1, 1)];
        let inputs = PartitionInputs {
            as_of: date(2025, 1, 1),
            report_dates: &reports,
            last_cashflow_date: Some(date(2028, 1, 1)),
            call: Some(LegDates {
                exercise_dates: &calls,
                notify_dates: &[],
                replace_cashflow: false,
            }),
            put: None,
        };

        let partition = build_partition(&inputs, &sim_dates());

        assert_eq!(partition[0].date, date(2025, 1, 1));
        assert_eq!(partition[0].exposure_index, Some(0));
        for w in partition.windows(2) {
            assert!(w[1].date > w[0].date, "dates must be strictly increasing");
        }
        let last = partition.last().unwrap();
        assert!(last.flags.is_value_date());

        // Report date beyond the last cashflow is truncated away
        assert_eq!(last.date, date(2027, 1, 1));

        // Re-inserted date keeps the exercise flags and gains the exposure index
        let year_one = &partition[2];
        assert_eq!(year_one.date, date(2026, 1, 1));
        assert!(year_one.flags.is_call_exercise_date());
        assert!(year_one.flags.is_mtm_date());
        assert_eq!(year_one.exposure_index, Some(2));
        assert_eq!(year_one.simulation_index, GridIndex::Exact(1));

        assert_eq!(partition[1].simulation_index, GridIndex::Between(1));
    }

    #[test]
    fn test_replace_cashflow_and_reset_flags() {
        let puts = [date(2026, 1, 1)];
        let notify = [date(2025, 6, 1)];
        let inputs = PartitionInputs {
            as_of: date(2025, 1, 1),
            report_dates: &[],
            last_cashflow_date: None,
            call: None,
            put: Some(LegDates {
                exercise_dates: &puts,
                notify_dates: &notify,
                replace_cashflow: true,
            }),
        };

        let partition = build_partition(&inputs, &sim_dates());
        assert_eq!(partition.len(), 3);
        assert!(partition[1].flags.is_put_reset_date());
        assert!(!partition[1].flags.is_value_date());
        assert!(partition[2].flags.contains(PartitionFlags::PUT_EXERCISE | PartitionFlags::REPLACE_CASHFLOW));
    }

    #[test]
    fn test_only_valuation_date_without_events() {
        let inputs = PartitionInputs {
            as_of: date(2025, 1, 1),
            report_dates: &[],
            last_cashflow_date: Some(date(2024, 1, 1)),
            call: None,
            put: None,
        };
        let partition = build_partition(&inputs, &sim_dates());
        assert_eq!(partition.len(), 1);
        assert!(partition[0].flags.is_mtm_date());
    }

    #[test]
    fn test_bucket_of() {
        let inputs = PartitionInputs {
            as_of: date(2025, 1, 1),
            report_dates: &[date(2026, 1, 1)],
            last_cashflow_date: Some(date(2027, 1, 1)),
            call: None,
            put: None,
        };
        let partition = build_partition(&inputs, &sim_dates());
        assert_eq!(bucket_of(&partition, date(2025, 6, 1)), 1);
        assert_eq!(bucket_of(&partition, date(2026, 1, 1)), 1);
        assert_eq!(bucket_of(&partition, date(2026, 6, 1)), 2);
    }
}
