//! Declarative candidate selection.
//!
//! A selection file holds one named group with an ordered list of filter blocks:
//!
//! ```json
//! { "first_run": [
//!     { "period": {"min": 0.001, "max": 0.01}, "snr": {"min": 8, "max": 1000}, "total_cands_limit": 50 },
//!     { "period": {"min": 0.01, "max": 10.0}, "total_cands_limit": 20 }
//! ] }
//! ```
//!
//! Constraints inside a block are intersected; blocks are evaluated independently against the
//! same input table, concatenated, de-duplicated by candidate id (first occurrence wins) and
//! sorted by id.

use std::collections::HashSet;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::info;

use crate::candidate::{CandidateRecord, CandidateTable, Column};
use crate::error::{FoldError, Result};

const LIMIT_KEY: &str = "total_cands_limit";

/// Inclusive range over one numeric column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeConstraint {
    pub column: Column,
    pub min: f64,
    pub max: f64,
}

impl RangeConstraint {
    pub fn matches(&self, cand: &CandidateRecord) -> bool {
        self.column
            .value(cand)
            .map(|v| (self.min..=self.max).contains(&v))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterBlock {
    pub label: String,
    pub constraints: Vec<RangeConstraint>,
    /// First-N cap in table order.
    pub limit: Option<usize>,
}

impl FilterBlock {
    pub fn matches(&self, cand: &CandidateRecord) -> bool {
        self.constraints.iter().all(|c| c.matches(cand))
    }

    pub fn select(&self, table: &CandidateTable) -> Vec<CandidateRecord> {
        let mut selected: Vec<CandidateRecord> =
            table.iter().filter(|c| self.matches(c)).cloned().collect();
        info!("Filter {} selected {} candidates.", self.label, selected.len());

        if let Some(limit) = self.limit {
            if selected.len() > limit {
                info!(
                    "Filter {} returned {} candidates, exceeding limit {}. Truncating.",
                    self.label,
                    selected.len(),
                    limit
                );
                selected.truncate(limit);
            }
        }
        selected
    }

    fn from_json(label: String, raw: &Value) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| FoldError::config(format!("filter {label} must be a JSON object")))?;

        let mut constraints = Vec::new();
        let mut limit = None;
        for (key, bounds) in object {
            if key == LIMIT_KEY {
                limit = parse_limit(&label, bounds)?;
                continue;
            }
            constraints.push(parse_constraint(&label, key, bounds)?);
        }
        Ok(Self {
            label,
            constraints,
            limit,
        })
    }
}

fn parse_limit(label: &str, raw: &Value) -> Result<Option<usize>> {
    if raw.is_null() {
        return Ok(None);
    }
    raw.as_u64()
        .map(|n| Some(n as usize))
        .ok_or_else(|| {
            FoldError::config(format!(
                "filter {label}: '{LIMIT_KEY}' must be a non-negative integer, got {raw}"
            ))
        })
}

fn parse_constraint(label: &str, key: &str, bounds: &Value) -> Result<RangeConstraint> {
    let column = Column::from_name(key).ok_or_else(|| {
        FoldError::config(format!(
            "filter {label}: parameter '{key}' not found in candidate columns"
        ))
    })?;
    if !column.is_numeric() {
        return Err(FoldError::config(format!(
            "filter {label}: parameter '{key}' is not numeric and cannot be range-filtered"
        )));
    }

    let empty = Map::new();
    let bounds = bounds.as_object().unwrap_or(&empty);
    let bound = |name: &str| -> Result<f64> {
        bounds.get(name).and_then(Value::as_f64).ok_or_else(|| {
            FoldError::config(format!(
                "filter {label}: parameter '{key}' must have numeric 'min' and 'max'"
            ))
        })
    };
    Ok(RangeConstraint {
        column,
        min: bound("min")?,
        max: bound("max")?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub group: String,
    pub blocks: Vec<FilterBlock>,
}

impl FilterSpec {
    /// Only the first group (in file order) is used.
    pub fn from_value(value: &Value) -> Result<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| FoldError::config("selection configuration must be a JSON object"))?;
        let (group, list) = root
            .iter()
            .next()
            .ok_or_else(|| FoldError::config("selection configuration defines no group"))?;
        let list = list.as_array().ok_or_else(|| {
            FoldError::config(format!("selection group '{group}' must be a list of filters"))
        })?;

        let blocks = list
            .iter()
            .enumerate()
            .map(|(idx, raw)| FilterBlock::from_json(format!("block {}", idx + 1), raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            group: group.clone(),
            blocks,
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn apply(&self, table: &CandidateTable) -> CandidateTable {
        if self.blocks.is_empty() {
            info!("Selection group '{}' has no filters; keeping all candidates.", self.group);
            return table.clone();
        }

        let concatenated: Vec<CandidateRecord> =
            self.blocks.iter().flat_map(|b| b.select(table)).collect();
        info!("Total candidates after concatenation: {}", concatenated.len());

        let mut seen = HashSet::new();
        let mut unique: Vec<CandidateRecord> = concatenated
            .into_iter()
            .filter(|c| seen.insert(c.cand_id))
            .collect();
        info!("Total candidates after dropping duplicates: {}", unique.len());

        unique.sort_by_key(|c| c.cand_id);
        CandidateTable::new(unique)
    }
}

/// Identity when no selection file is given.
pub fn apply_selection(table: &CandidateTable, spec: Option<&FilterSpec>) -> CandidateTable {
    match spec {
        Some(spec) => spec.apply(table),
        None => table.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_selection, FilterSpec};
    use crate::candidate::{synthetic, CandidateTable, Column};
    use crate::error::FoldError;

    fn ten_candidates() -> CandidateTable {
        let periods = [2.0, 0.01, 0.06, 0.3, 1.2, 0.05, 0.5, 0.02, 0.45, 0.8];
        periods
            .iter()
            .enumerate()
            .map(|(i, &p)| synthetic(i as u64, p, 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn limited_period_block_keeps_first_rows_in_table_order() {
        let spec = FilterSpec::from_json_str(
            r#"{"run": [{"period": {"min": 0.05, "max": 0.5}, "total_cands_limit": 3}]}"#,
        )
        .unwrap();
        let out = spec.apply(&ten_candidates());
        assert_eq!(out.ids(), vec![2, 3, 5]);
        assert!(out.iter().all(|c| (0.05..=0.5).contains(&c.period)));
    }

    #[test]
    fn limit_is_not_ranked_by_snr() {
        let mut table: Vec<_> = ten_candidates().rows().to_vec();
        table[8].snr = 500.0;
        let spec = FilterSpec::from_json_str(
            r#"{"run": [{"period": {"min": 0.05, "max": 0.5}, "total_cands_limit": 1}]}"#,
        )
        .unwrap();
        let out = spec.apply(&CandidateTable::new(table));
        assert_eq!(out.ids(), vec![2]);
    }

    #[test]
    fn constraints_are_a_conjunction() {
        let table = ten_candidates();
        let both = FilterSpec::from_json_str(
            r#"{"run": [{"period": {"min": 0.0, "max": 1.0}, "dm": {"min": 103, "max": 106}}]}"#,
        )
        .unwrap();
        let period_only =
            FilterSpec::from_json_str(r#"{"run": [{"period": {"min": 0.0, "max": 1.0}}]}"#)
                .unwrap();
        let narrow = both.apply(&table);
        let wide = period_only.apply(&table);
        assert_eq!(narrow.ids(), vec![3, 5, 6]);
        assert!(narrow.ids().iter().all(|id| wide.ids().contains(id)));
        assert!(wide.len() >= narrow.len());
    }

    #[test]
    fn overlapping_blocks_are_deduplicated_and_sorted() {
        let spec = FilterSpec::from_json_str(
            r#"{"run": [
                {"dm": {"min": 105, "max": 109}},
                {"cand_id": {"min": 0, "max": 5}}
            ]}"#,
        )
        .unwrap();
        let out = spec.apply(&ten_candidates());
        assert_eq!(out.ids(), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(out.iter().filter(|c| c.cand_id == 5).count(), 1);
    }

    #[test]
    fn block_limits_are_spent_independently() {
        // Block 1 keeps id 2 and 3; block 2 spends its single slot on id 2 again,
        // so id 5 is never selected even though block 2 matched it.
        let spec = FilterSpec::from_json_str(
            r#"{"run": [
                {"period": {"min": 0.05, "max": 0.5}, "total_cands_limit": 2},
                {"period": {"min": 0.05, "max": 0.06}, "total_cands_limit": 1}
            ]}"#,
        )
        .unwrap();
        assert_eq!(spec.apply(&ten_candidates()).ids(), vec![2, 3]);
    }

    #[test]
    fn blocks_that_match_nothing_yield_an_empty_table() {
        let spec =
            FilterSpec::from_json_str(r#"{"run": [{"snr": {"min": 100, "max": 200}}]}"#).unwrap();
        assert!(spec.apply(&ten_candidates()).is_empty());
    }

    #[test]
    fn no_blocks_or_no_spec_is_identity() {
        let table = ten_candidates();
        let empty = FilterSpec::from_json_str(r#"{"run": []}"#).unwrap();
        assert_eq!(empty.apply(&table), table);
        assert_eq!(apply_selection(&table, None), table);
    }

    #[test]
    fn first_group_in_file_order_wins() {
        let spec = FilterSpec::from_json_str(
            r#"{"zeta": [{"nh": {"min": 1, "max": 1}}], "alpha": [{"nh": {"min": 9, "max": 9}}]}"#,
        )
        .unwrap();
        assert_eq!(spec.group, "zeta");
        assert_eq!(spec.blocks[0].constraints[0].column, Column::Nh);
    }

    #[test]
    fn unknown_column_is_a_configuration_error() {
        let err = FilterSpec::from_json_str(r#"{"run": [{"opt_period": {"min": 0, "max": 1}}]}"#)
            .unwrap_err();
        assert!(matches!(err, FoldError::Config(_)));
        assert!(err.to_string().contains("opt_period"));
    }

    #[test]
    fn range_without_both_bounds_is_rejected() {
        let err =
            FilterSpec::from_json_str(r#"{"run": [{"snr": {"min": 8}}]}"#).unwrap_err();
        assert!(matches!(err, FoldError::Config(_)));
    }

    #[test]
    fn text_column_cannot_be_range_filtered() {
        let err = FilterSpec::from_json_str(
            r#"{"run": [{"filterbank_file": {"min": 0, "max": 1}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FoldError::Config(_)));
    }
}
