use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use roxmltree::{Document, Node};
use tracing::debug;

use crate::candidate::{CandidateRecord, CandidateTable};
use crate::error::{FoldError, Result};
use crate::utils::sanitize_source_name;

/// Candidate children that are never loaded into the table.
pub const IGNORED_FIELDS: [&str; 7] = [
    "opt_period",
    "folded_snr",
    "byte_offset",
    "is_adjacent",
    "is_physical",
    "ddm_count_ratio",
    "ddm_snr_ratio",
];

/// Observation metadata shared by every candidate of one search output.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub tsamp: f64,
    pub source_name: String,
    pub total_nsamples: u64,
    pub infilename: String,
    pub fft_size: u64,
    pub coherent_dm: f64,
    pub segment_start_sample: u64,
    pub segment_nsamples: u64,
    pub segment_pepoch: f64,
}

impl Observation {
    pub fn effective_tobs(&self) -> f64 {
        self.tsamp * self.segment_nsamples as f64
    }
}

#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub observation: Observation,
    pub table: CandidateTable,
}

fn is_tag(node: Node<'_, '_>, tag: &str) -> bool {
    node.is_element() && node.tag_name().name() == tag
}

fn find_block<'a, 'input>(doc: &'a Document<'input>, tag: &str) -> Result<Node<'a, 'input>> {
    doc.descendants()
        .find(|n| is_tag(*n, tag))
        .ok_or_else(|| FoldError::data(format!("{tag} block not found in candidate XML")))
}

fn child_text<'a>(node: Node<'a, 'a>, tag: &str) -> Option<&'a str> {
    node.children()
        .find(|n| is_tag(*n, tag))
        .and_then(|n| n.text())
        .map(str::trim)
}

fn parse_text<T: FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| FoldError::data(format!("cannot convert {what} value '{raw}'")))
}

fn required<T: FromStr>(node: Node<'_, '_>, tag: &str) -> Result<T> {
    let parent = node.tag_name().name();
    let raw = child_text(node, tag)
        .ok_or_else(|| FoldError::data(format!("{parent}/{tag} missing")))?;
    parse_text(raw, &format!("{parent}/{tag}"))
}

fn parse_observation(doc: &Document<'_>) -> Result<Observation> {
    let header = find_block(doc, "header_parameters")?;
    let search = find_block(doc, "search_parameters")?;
    let segment = find_block(doc, "segment_parameters")?;

    let raw_source = child_text(header, "source_name").unwrap_or("");
    let source_name = sanitize_source_name(raw_source);
    if source_name != raw_source.trim() {
        debug!("source name '{raw_source}' replaced by '{source_name}'");
    }

    Ok(Observation {
        tsamp: required(header, "tsamp")?,
        source_name,
        total_nsamples: required(header, "nsamples")?,
        infilename: child_text(search, "infilename")
            .ok_or_else(|| FoldError::data("search_parameters/infilename missing"))?
            .to_string(),
        fft_size: required(search, "size")?,
        coherent_dm: required(search, "cdm")?,
        segment_start_sample: required(segment, "segment_start_sample")?,
        segment_nsamples: required(segment, "segment_nsamples")?,
        segment_pepoch: required(segment, "segment_pepoch")?,
    })
}

fn candidate_field<T: FromStr>(fields: &HashMap<&str, &str>, cand_id: u64, name: &str) -> Result<T> {
    let raw = fields
        .get(name)
        .ok_or_else(|| FoldError::data(format!("candidate {cand_id} has no '{name}' field")))?;
    parse_text(raw, &format!("candidate {cand_id} '{name}'"))
}

fn parse_candidate(node: Node<'_, '_>, filterbank_file: &str) -> Result<CandidateRecord> {
    let raw_id = node
        .attribute("id")
        .ok_or_else(|| FoldError::data("candidate element without id attribute"))?;
    let cand_id: u64 = parse_text(raw_id, "candidate id")?;

    let fields: HashMap<&str, &str> = node
        .children()
        .filter(|n| n.is_element())
        .filter(|n| !IGNORED_FIELDS.contains(&n.tag_name().name()))
        .map(|n| (n.tag_name().name(), n.text().map(str::trim).unwrap_or("")))
        .collect();

    Ok(CandidateRecord {
        cand_id,
        period: candidate_field(&fields, cand_id, "period")?,
        dm: candidate_field(&fields, cand_id, "dm")?,
        acc: candidate_field(&fields, cand_id, "acc")?,
        nh: candidate_field(&fields, cand_id, "nh")?,
        snr: candidate_field(&fields, cand_id, "snr")?,
        nassoc: candidate_field(&fields, cand_id, "nassoc")?,
        pb: candidate_field(&fields, cand_id, "pb")?,
        a1: candidate_field(&fields, cand_id, "a1")?,
        phi: candidate_field(&fields, cand_id, "phi")?,
        t0: candidate_field(&fields, cand_id, "t0")?,
        omega: candidate_field(&fields, cand_id, "omega")?,
        ecc: candidate_field(&fields, cand_id, "ecc")?,
        jerk: candidate_field(&fields, cand_id, "jerk")?,
        filterbank_file: filterbank_file.to_string(),
    })
}

/// Path recorded in the `filterbank_file` column: the XML input file name re-rooted
/// under `publish_dir` (its own directory when no publish dir is given).
pub fn published_filterbank(infilename: &str, publish_dir: Option<&Path>) -> PathBuf {
    let input = Path::new(infilename);
    let dir = publish_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    match input.file_name() {
        Some(name) => dir.join(name),
        None => dir,
    }
}

pub fn parse_candidate_document(xml: &str, publish_dir: Option<&Path>) -> Result<CandidateFile> {
    let doc = Document::parse(xml)?;
    let observation = parse_observation(&doc)?;
    let filterbank_file = published_filterbank(&observation.infilename, publish_dir)
        .to_string_lossy()
        .into_owned();

    let candidates = find_block(&doc, "candidates")?;
    let rows = candidates
        .children()
        .filter(|n| is_tag(*n, "candidate"))
        .map(|n| parse_candidate(n, &filterbank_file))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    if let Some(dup) = rows.iter().find(|r| !seen.insert(r.cand_id)) {
        return Err(FoldError::data(format!(
            "candidate id {} appears more than once",
            dup.cand_id
        )));
    }

    Ok(CandidateFile {
        observation,
        table: CandidateTable::new(rows),
    })
}

pub fn parse_candidate_xml(path: &Path, publish_dir: Option<&Path>) -> Result<CandidateFile> {
    let xml = std::fs::read_to_string(path)?;
    parse_candidate_document(&xml, publish_dir)
}

#[cfg(test)]
pub(crate) const SAMPLE_XML: &str = r#"<?xml version="1.0"?>
<peasoup_search>
  <misc_info><username>observer</username></misc_info>
  <header_parameters>
    <source_name> J1748-2446 </source_name>
    <tsamp>0.000064</tsamp>
    <nsamples>1000000</nsamples>
  </header_parameters>
  <search_parameters>
    <infilename>/beegfs/raw/cfbf00088_01.fil</infilename>
    <size>1048576</size>
    <cdm>250.5</cdm>
  </search_parameters>
  <segment_parameters>
    <segment_start_sample>250000</segment_start_sample>
    <segment_nsamples>500000</segment_nsamples>
    <segment_pepoch>60000.125</segment_pepoch>
  </segment_parameters>
  <dedispersion_trials count="1"/>
  <acceleration_trials count="1"/>
  <cuda_device_parameters/>
  <candidates>
    <candidate id="0">
      <period>0.0115</period><opt_period>0.0116</opt_period><dm>230.1</dm><acc>12.5</acc>
      <nh>2</nh><snr>14.2</snr><folded_snr>0</folded_snr><is_adjacent>0</is_adjacent>
      <is_physical>1</is_physical><ddm_count_ratio>0.5</ddm_count_ratio>
      <ddm_snr_ratio>0.4</ddm_snr_ratio><nassoc>3</nassoc><byte_offset>0</byte_offset>
      <pb>0</pb><a1>0</a1><phi>0</phi><t0>0</t0><omega>0</omega><ecc>0</ecc><jerk>0</jerk>
    </candidate>
    <candidate id="1">
      <period>0.45</period><dm>231.0</dm><acc>-3.0</acc><nh>4</nh><snr>9.1</snr>
      <nassoc>1</nassoc><pb>0</pb><a1>0</a1><phi>0</phi><t0>0</t0><omega>0</omega>
      <ecc>0</ecc><jerk>0</jerk>
    </candidate>
  </candidates>
</peasoup_search>
"#;
