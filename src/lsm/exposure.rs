//! Exposure grid generation and export

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::error::LsmResult;

use super::partition::Partition;
use super::workspace::Workspace;

/// Per-path exposures on the report dates, with matching deflators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureGrid {
    pub report_dates: Vec<NaiveDate>,
    /// `[path][column]`: MtM × FX × notional in deflated numeraire units
    pub values: Vec<Vec<f64>>,
    /// `[path][column]`: numeraire deflator (1.0 at the valuation date)
    pub discount: Vec<Vec<f64>>,
}

impl ExposureGrid {
    /// Grid of zeros with unit discount
    pub fn zeros(report_dates: Vec<NaiveDate>, paths: usize) -> Self {
        let columns = report_dates.len();
        Self {
            report_dates,
            values: vec![vec![0.0; columns]; paths],
            discount: vec![vec![1.0; columns]; paths],
        }
    }

    pub fn path_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_count(&self) -> usize {
        self.report_dates.len()
    }

    fn column_stat<F: Fn(&[f64]) -> f64>(&self, stat: F) -> Vec<f64> {
        (0..self.column_count())
            .map(|c| {
                let column: Vec<f64> = self.values.iter().map(|row| row[c]).collect();
                stat(&column)
            })
            .collect()
    }

    /// Mean exposure per report date
    pub fn expected_exposure(&self) -> Vec<f64> {
        self.column_stat(|col| {
            if col.is_empty() {
                0.0
            } else {
                col.iter().sum::<f64>() / col.len() as f64
            }
        })
    }

    /// Mean of the positive part per report date
    pub fn expected_positive_exposure(&self) -> Vec<f64> {
        self.column_stat(|col| {
            if col.is_empty() {
                0.0
            } else {
                col.iter().map(|v| v.max(0.0)).sum::<f64>() / col.len() as f64
            }
        })
    }

    /// Largest exposure over all paths per report date
    pub fn peak_exposure(&self) -> Vec<f64> {
        self.column_stat(|col| col.iter().cloned().fold(0.0, f64::max))
    }

    /// Write `Path,<date>,...` rows
    pub fn write_csv<W: Write>(&self, writer: W) -> LsmResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        let mut header = vec!["Path".to_string()];
        header.extend(self.report_dates.iter().map(|d| d.to_string()));
        csv_writer.write_record(&header)?;

        for (path, row) in self.values.iter().enumerate() {
            let mut record = vec![path.to_string()];
            record.extend(row.iter().map(|v| format!("{:.8}", v)));
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv_path<P: AsRef<Path>>(&self, path: P) -> LsmResult<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}

/// Fill the grid from the MtM workspace
///
/// A partition date carrying an exposure column writes that column and every
/// earlier column not yet written. The valuation date uses `spot_fx`.
pub fn generate_exposures(
    partition: &[Partition],
    ws: &Workspace,
    report_dates: &[NaiveDate],
    notional: f64,
    spot_fx: f64,
) -> ExposureGrid {
    let mut grid = ExposureGrid::zeros(report_dates.to_vec(), ws.paths);
    let mut next_unfilled = 0;

    for (j, p) in partition.iter().enumerate() {
        let Some(column) = p.exposure_index else {
            continue;
        };
        if column < next_unfilled {
            continue;
        }
        let slice = &ws.slices[j];

        for path in 0..ws.paths {
            let (fx, discount) = if j == 0 {
                (spot_fx, 1.0)
            } else {
                (slice.fx[path], slice.deflator[path])
            };
            let value = slice.mtm[path] * fx * notional;
            for c in next_unfilled..=column {
                grid.values[path][c] = value;
                grid.discount[path][c] = discount;
            }
        }
        next_unfilled = column + 1;
    }

    // Columns after the last partition date: the instrument no longer exists
    for row in grid.discount.iter_mut() {
        for d in row.iter_mut().skip(next_unfilled) {
            *d = 0.0;
        }
    }

    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsm::forward::PathRecord;
    use crate::lsm::partition::PartitionFlags;
    use crate::simulation::GridIndex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn partition_at(date: NaiveDate, exposure_index: Option<usize>) -> Partition {
        Partition {
            date,
            time: 0.0,
            simulation_index: GridIndex::Exact(0),
            exposure_index,
            flags: PartitionFlags::MTM,
        }
    }

    #[test]
    fn test_forward_fill_and_scaling() {
        let mut record = PathRecord::new(2, 0);
        record.fx = vec![1.0, 2.0];
        record.deflator = vec![1.0, 0.9];
        let mut ws = Workspace::from_records(&[record], 2, 0);
        ws.slices[0].mtm[0] = 10.0;
        ws.slices[1].mtm[0] = 4.0;

        let partition = vec![
            partition_at(date(2025, 1, 1), Some(0)),
            partition_at(date(2026, 1, 1), Some(2)),
        ];
        let reports = vec![date(2025, 1, 1), date(2025, 6, 1), date(2026, 1, 1), date(2027, 1, 1)];

        let grid = generate_exposures(&partition, &ws, &reports, 100.0, 1.5);

        assert_eq!(grid.values[0], vec![1500.0, 800.0, 800.0, 0.0]);
        assert_eq!(grid.discount[0], vec![1.0, 0.9, 0.9, 0.0]);
        assert_eq!(grid.expected_exposure(), vec![1500.0, 800.0, 800.0, 0.0]);
    }

    #[test]
    fn test_write_csv() {
        let grid = ExposureGrid {
            report_dates: vec![date(2025, 1, 1)],
            values: vec![vec![1.0], vec![-2.0]],
            discount: vec![vec![1.0], vec![1.0]],
        };
        let mut buffer = Vec::new();
        grid.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.starts_with("Path,2025-01-01\n"));
        assert!(text.contains("1,-2.00000000"));
        assert_eq!(grid.expected_positive_exposure(), vec![0.5]);
        assert_eq!(grid.peak_exposure(), vec![1.0]);
    }
}
