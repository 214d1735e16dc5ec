use std::path::Path;

use crate::error::Result;

/// One row of a peasoup candidate table.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub cand_id: u64,
    pub period: f64,
    pub dm: f64,
    pub acc: f64,
    pub nh: i64,
    pub snr: f64,
    pub nassoc: i64,
    pub pb: f64,
    pub a1: f64,
    pub phi: f64,
    pub t0: f64,
    pub omega: f64,
    pub ecc: f64,
    pub jerk: f64,
    pub filterbank_file: String,
}

/// Named columns of the candidate table, in audit-file order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    Period,
    Dm,
    Acc,
    Nh,
    Snr,
    Nassoc,
    Pb,
    A1,
    Phi,
    T0,
    Omega,
    Ecc,
    Jerk,
    CandId,
    FilterbankFile,
}

impl Column {
    /// Column order of every CSV this crate writes. Readers select columns by header name.
    pub const ALL: [Column; 15] = [
        Column::Period,
        Column::Dm,
        Column::Acc,
        Column::Nh,
        Column::Snr,
        Column::Nassoc,
        Column::Pb,
        Column::A1,
        Column::Phi,
        Column::T0,
        Column::Omega,
        Column::Ecc,
        Column::Jerk,
        Column::CandId,
        Column::FilterbankFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Period => "period",
            Column::Dm => "dm",
            Column::Acc => "acc",
            Column::Nh => "nh",
            Column::Snr => "snr",
            Column::Nassoc => "nassoc",
            Column::Pb => "pb",
            Column::A1 => "a1",
            Column::Phi => "phi",
            Column::T0 => "t0",
            Column::Omega => "omega",
            Column::Ecc => "ecc",
            Column::Jerk => "jerk",
            Column::CandId => "cand_id_in_file",
            Column::FilterbankFile => "filterbank_file",
        }
    }

    /// `cand_id` is accepted as a shorthand for the `cand_id_in_file` header.
    pub fn from_name(name: &str) -> Option<Column> {
        if name == "cand_id" {
            return Some(Column::CandId);
        }
        Column::ALL.iter().copied().find(|c| c.name() == name)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Column::FilterbankFile)
    }

    /// Numeric view of the column for range filtering; `None` for text columns.
    pub fn value(self, rec: &CandidateRecord) -> Option<f64> {
        Some(match self {
            Column::Period => rec.period,
            Column::Dm => rec.dm,
            Column::Acc => rec.acc,
            Column::Nh => rec.nh as f64,
            Column::Snr => rec.snr,
            Column::Nassoc => rec.nassoc as f64,
            Column::Pb => rec.pb,
            Column::A1 => rec.a1,
            Column::Phi => rec.phi,
            Column::T0 => rec.t0,
            Column::Omega => rec.omega,
            Column::Ecc => rec.ecc,
            Column::Jerk => rec.jerk,
            Column::CandId => rec.cand_id as f64,
            Column::FilterbankFile => return None,
        })
    }
}

/// How float columns are rendered in audit CSV files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatFormat {
    /// Shortest representation that round-trips.
    Shortest,
    /// Fixed number of decimal digits.
    Fixed(usize),
}

impl FloatFormat {
    pub fn render(self, value: f64) -> String {
        match self {
            FloatFormat::Shortest => format!("{value}"),
            FloatFormat::Fixed(digits) => format!("{value:.digits$}"),
        }
    }
}

/// Immutable candidate table. Filtering stages build new tables instead of editing rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateTable {
    rows: Vec<CandidateRecord>,
}

impl CandidateTable {
    pub fn new(rows: Vec<CandidateRecord>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[CandidateRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateRecord> {
        self.rows.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.rows.iter().map(|r| r.cand_id).collect()
    }

    /// Keplerian mode is decided once for the whole table from the first row's `pb`.
    pub fn is_keplerian(&self) -> bool {
        self.rows.first().map(|r| r.pb > 0.0).unwrap_or(false)
    }

    /// Split rows by `mask`, returning `(matching, rest)`; both keep table order.
    pub fn partition(&self, mask: &[bool]) -> (CandidateTable, CandidateTable) {
        let mut matching = Vec::new();
        let mut rest = Vec::new();
        for (row, &hit) in self.rows.iter().zip(mask) {
            if hit {
                matching.push(row.clone());
            } else {
                rest.push(row.clone());
            }
        }
        (CandidateTable::new(matching), CandidateTable::new(rest))
    }

    pub fn write_csv(&self, path: &Path, floats: FloatFormat) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(Column::ALL.iter().map(|c| c.name()))?;
        for row in &self.rows {
            writer.write_record(record_fields(row, floats))?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl FromIterator<CandidateRecord> for CandidateTable {
    fn from_iter<I: IntoIterator<Item = CandidateRecord>>(iter: I) -> Self {
        CandidateTable::new(iter.into_iter().collect())
    }
}

fn record_fields(row: &CandidateRecord, floats: FloatFormat) -> Vec<String> {
    Column::ALL
        .iter()
        .map(|column| match column {
            Column::Nh => row.nh.to_string(),
            Column::Nassoc => row.nassoc.to_string(),
            Column::CandId => row.cand_id.to_string(),
            Column::FilterbankFile => row.filterbank_file.clone(),
            other => floats.render(other.value(row).unwrap_or(f64::NAN)),
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn synthetic(cand_id: u64, period: f64, dm: f64) -> CandidateRecord {
    CandidateRecord {
        cand_id,
        period,
        dm,
        acc: 0.0,
        nh: 1,
        snr: 10.0,
        nassoc: 0,
        pb: 0.0,
        a1: 0.0,
        phi: 0.0,
        t0: 0.0,
        omega: 0.0,
        ecc: 0.0,
        jerk: 0.0,
        filterbank_file: "/data/beam.fil".to_string(),
    }
}
