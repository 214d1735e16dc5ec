use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::candidate::{CandidateRecord, CandidateTable};
use crate::error::{FoldError, Result};

pub const AVOIDED_CANDIDATES_FILE: &str = "avoided_candidates_to_fold.csv";

const REQUIRED_COLUMNS: [&str; 4] = ["period_ms", "period_tolerance_ms", "dm", "dm_tolerance"];

#[derive(Debug, Deserialize)]
struct AvoidRow {
    period_ms: f64,
    period_tolerance_ms: f64,
    dm: f64,
    dm_tolerance: f64,
}

/// Exclusion window in seconds and pc/cm^3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvoidWindow {
    pub period_center: f64,
    pub period_tolerance: f64,
    pub dm_center: f64,
    pub dm_tolerance: f64,
}

impl AvoidWindow {
    pub fn from_millis(period_ms: f64, period_tolerance_ms: f64, dm: f64, dm_tolerance: f64) -> Self {
        Self {
            period_center: period_ms / 1000.0,
            period_tolerance: period_tolerance_ms / 1000.0,
            dm_center: dm,
            dm_tolerance,
        }
    }

    pub fn period_bounds(&self) -> (f64, f64) {
        (
            self.period_center - self.period_tolerance,
            self.period_center + self.period_tolerance,
        )
    }

    pub fn dm_bounds(&self) -> (f64, f64) {
        (self.dm_center - self.dm_tolerance, self.dm_center + self.dm_tolerance)
    }

    /// Closed intervals on both axes.
    pub fn contains(&self, cand: &CandidateRecord) -> bool {
        let (p_min, p_max) = self.period_bounds();
        let (dm_min, dm_max) = self.dm_bounds();
        (p_min..=p_max).contains(&cand.period) && (dm_min..=dm_max).contains(&cand.dm)
    }
}

pub fn parse_avoid_list<R: Read>(reader: R) -> Result<Vec<AvoidWindow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(FoldError::data(format!(
                "avoid list is missing required column '{column}' (found: {})",
                headers.iter().collect::<Vec<_>>().join(", ")
            )));
        }
    }

    csv_reader
        .deserialize::<AvoidRow>()
        .map(|row| -> Result<AvoidWindow> {
            let row = row?;
            Ok(AvoidWindow::from_millis(
                row.period_ms,
                row.period_tolerance_ms,
                row.dm,
                row.dm_tolerance,
            ))
        })
        .collect()
}

pub fn read_avoid_list(path: &Path) -> Result<Vec<AvoidWindow>> {
    let file = std::fs::File::open(path)?;
    parse_avoid_list(file)
}

/// Logical OR of every window's membership test, one entry per row.
pub fn exclusion_mask(table: &CandidateTable, windows: &[AvoidWindow]) -> Vec<bool> {
    table
        .iter()
        .map(|cand| windows.iter().any(|w| w.contains(cand)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct AvoidOutcome {
    pub retained: CandidateTable,
    pub avoided: CandidateTable,
}

pub fn apply_avoid_list(table: &CandidateTable, windows: &[AvoidWindow]) -> AvoidOutcome {
    for window in windows {
        let (p_min, p_max) = window.period_bounds();
        let (dm_min, dm_max) = window.dm_bounds();
        info!("Avoid window: {p_min:.8} - {p_max:.8} s | DM window: {dm_min:.4} - {dm_max:.4}");
    }

    let mask = exclusion_mask(table, windows);
    let (avoided, retained) = table.partition(&mask);
    info!(
        "Total candidates after avoiding: {} (removed {})",
        retained.len(),
        avoided.len()
    );
    AvoidOutcome { retained, avoided }
}

#[cfg(test)]
mod tests {
    use super::{apply_avoid_list, parse_avoid_list, AvoidWindow};
    use crate::candidate::{synthetic, CandidateTable};
    use crate::error::FoldError;

    #[test]
    fn windows_are_converted_from_milliseconds() {
        let csv = "period_ms,period_tolerance_ms,dm,dm_tolerance\n5.757, 0.01 ,2.64,0.5\n";
        let windows = parse_avoid_list(csv.as_bytes()).unwrap();
        assert_eq!(windows.len(), 1);
        assert!((windows[0].period_center - 0.005757).abs() < 1e-15);
        assert!((windows[0].period_tolerance - 0.00001).abs() < 1e-15);
        assert_eq!(windows[0].dm_center, 2.64);
    }

    #[test]
    fn missing_column_fails_fast() {
        let csv = "period_ms,period_tolerance_ms,dm\n5.757,0.01,2.64\n";
        let err = parse_avoid_list(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, FoldError::Data(_)));
        assert!(err.to_string().contains("dm_tolerance"));
    }

    #[test]
    fn non_numeric_cell_is_an_error() {
        let csv = "period_ms,period_tolerance_ms,dm,dm_tolerance\nfast,0.01,2.64,0.5\n";
        assert!(parse_avoid_list(csv.as_bytes()).is_err());
    }

    #[test]
    fn both_axes_must_match_and_windows_are_or_ed() {
        let table = CandidateTable::new(vec![
            synthetic(0, 0.100, 50.0),
            synthetic(1, 0.100, 80.0),
            synthetic(2, 0.300, 80.0),
            synthetic(3, 0.1005, 49.0),
            synthetic(4, 0.250, 10.0),
        ]);
        let windows = [
            AvoidWindow::from_millis(100.0, 1.0, 50.0, 1.0),
            AvoidWindow::from_millis(300.0, 0.5, 80.0, 0.0),
        ];
        let outcome = apply_avoid_list(&table, &windows);
        assert_eq!(outcome.avoided.ids(), vec![0, 2, 3]);
        assert_eq!(outcome.retained.ids(), vec![1, 4]);
        assert_eq!(outcome.avoided.len() + outcome.retained.len(), table.len());
    }

    #[test]
    fn empty_window_list_keeps_everything() {
        let table = CandidateTable::new(vec![synthetic(0, 0.1, 1.0)]);
        let outcome = apply_avoid_list(&table, &[]);
        assert_eq!(outcome.retained, table);
        assert!(outcome.avoided.is_empty());
    }
}
