use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::error::{FoldError, Result};

pub const DEFAULT_FILTERED_CANDIDATES_FILE: &str = "filtered_df_for_folding.csv";

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Fold peasoup search candidates with PulsarX or PRESTO prepfold",
    long_about = None,
    after_help = "Examples:\n  peasoup_fold -i overview.xml -t pulsarx -p meerkat_fold.template -b cfbf00088\n  peasoup_fold -i overview.xml -t presto --presto-threads 8 -m beam_rfifind.mask\n  peasoup_fold -i overview.xml --config-file select.json --avoid-folding-file known_psrs.csv\n"
)]
pub struct Args {
    /// Peasoup candidate XML file; relative paths resolve against the launch directory, not --output-path
    #[arg(short = 'i', long = "input-file", visible_alias = "input_file")]
    pub input_file: Option<PathBuf>,

    /// Directory for all outputs; external tools run here (default: current directory)
    #[arg(short = 'o', long = "output-path", visible_alias = "output_path")]
    pub output_path: Option<PathBuf>,

    /// Output rootname for PulsarX products (default: --utc-beam)
    #[arg(short = 'r', long = "output-rootname", visible_alias = "output_rootname")]
    pub output_rootname: Option<String>,

    /// rfifind mask passed to prepfold
    #[arg(short = 'm', long = "mask-file", visible_alias = "mask_file")]
    pub mask_file: Option<PathBuf>,

    /// Folding backend
    #[arg(
        short = 't',
        long = "fold-technique",
        visible_alias = "fold_technique",
        default_value = "pulsarx",
        value_parser = clap::builder::PossibleValuesParser::new(["pulsarx", "presto"])
    )]
    pub fold_technique: String,

    /// Upper profile bin count (slow pulsars)
    #[arg(short = 'u', long = "nbins-high", visible_alias = "nbins_high", default_value_t = 128)]
    pub nbins_high: u32,

    /// Lower profile bin count (fast pulsars)
    #[arg(short = 'l', long = "nbins-low", visible_alias = "nbins_low", default_value_t = 64)]
    pub nbins_low: u32,

    /// Sub-integration length in seconds (default: tobs/64)
    #[arg(long = "subint-length", visible_alias = "subint_length")]
    pub subint_length: Option<u64>,

    /// Number of subbands
    #[arg(long, default_value_t = 64)]
    pub nsubband: u32,

    /// CLFD Q value
    #[arg(long = "clfd-q-value", visible_alias = "clfd_q_value", default_value_t = 2.0)]
    pub clfd_q_value: f64,

    /// RFI filter passed to PulsarX as `--rfi <value>`
    #[arg(long = "rfi-filter", visible_alias = "rfi_filter", allow_hyphen_values = true)]
    pub rfi_filter: Option<String>,

    /// Beam name (ifbf* incoherent, cfbfNNNNN coherent, or any name ending in digits)
    #[arg(short = 'b', long = "beam-name", visible_alias = "beam_name", default_value = "cfbf00000")]
    pub beam_name: String,

    /// UTC beam string, used as the default output rootname
    #[arg(long = "utc-beam", visible_alias = "utc_beam", default_value = "2024-01-01-00:00:00")]
    pub utc_beam: String,

    /// Channel mask as comma-separated `start:end` pairs
    #[arg(short = 'c', long = "chan-mask", visible_alias = "chan_mask", default_value = "")]
    pub chan_mask: String,

    /// Threads given to PulsarX
    #[arg(long = "pulsarx-threads", visible_alias = "pulsarx_threads", default_value_t = 24)]
    pub pulsarx_threads: usize,

    /// Parallel prepfold workers
    #[arg(long = "presto-threads", visible_alias = "presto_threads", default_value_t = 12)]
    pub presto_threads: usize,

    /// PulsarX fold template
    #[arg(
        short = 'p',
        long = "pulsarx-fold-template",
        visible_alias = "pulsarx_fold_template",
        default_value = "meerkat_fold.template"
    )]
    pub pulsarx_fold_template: String,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Directory recorded as the filterbank location in the audit table (default: input filterbank directory)
    #[arg(short = 'f', long = "filterbank-publish-dir", visible_alias = "filterbank_publish_dir")]
    pub filterbank_publish_dir: Option<PathBuf>,

    /// JSON selection configuration (relative to the launch directory)
    #[arg(long = "config-file", visible_alias = "config_file")]
    pub config_file: Option<PathBuf>,

    /// Audit CSV of the candidates handed to the folder
    #[arg(
        long = "filtered-candidates-file",
        visible_alias = "filtered_candidates_file",
        default_value = DEFAULT_FILTERED_CANDIDATES_FILE
    )]
    pub filtered_candidates_file: PathBuf,

    /// Override the reference epoch (MJD) read from the XML
    #[arg(long = "pepoch-override", visible_alias = "pepoch_override")]
    pub pepoch_override: Option<f64>,

    /// Override the start fraction [0..1]
    #[arg(long = "start-frac", visible_alias = "start_frac")]
    pub start_frac: Option<f64>,

    /// Override the end fraction [0..1]
    #[arg(long = "end-frac", visible_alias = "end_frac")]
    pub end_frac: Option<f64>,

    /// Extra arguments appended to every prepfold / PulsarX command
    #[arg(long = "extra-args", visible_alias = "extra_args", allow_hyphen_values = true)]
    pub extra_args: Option<String>,

    /// Coherent DM for folding (default: value in the XML)
    #[arg(long, allow_hyphen_values = true)]
    pub cdm: Option<f64>,

    /// Custom PulsarX bin plan; must start with `-b`
    #[arg(long = "custom-nbin-plan", visible_alias = "custom_nbin_plan", allow_hyphen_values = true)]
    pub custom_nbin_plan: Option<String>,

    /// PulsarX folding algorithm: render, dspsr or presto
    #[arg(
        long = "pulsarx-folding-algorithm",
        visible_alias = "pulsarx_folding_algorithm",
        default_value = "render"
    )]
    pub pulsarx_folding_algorithm: String,

    /// CSV of (period_ms, period_tolerance_ms, dm, dm_tolerance) windows never to fold
    #[arg(long = "avoid-folding-file", visible_alias = "avoid_folding_file")]
    pub avoid_folding_file: Option<PathBuf>,

    /// prepfold executable
    #[arg(long = "prepfold-bin", default_value = "prepfold")]
    pub prepfold_bin: String,

    /// PulsarX folding executable
    #[arg(long = "pulsarx-bin", default_value = "psrfold_fil2")]
    pub pulsarx_bin: String,

    /// Container image every external tool is run in
    #[arg(long = "container-image")]
    pub container_image: Option<String>,

    /// Paths bound into the container (repeatable)
    #[arg(long = "container-bind")]
    pub container_bind: Vec<String>,

    /// Container runtime used with --container-image
    #[arg(long = "container-runtime", default_value = "singularity")]
    pub container_runtime: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FoldTechnique {
    Presto,
    Pulsarx,
}

impl FromStr for FoldTechnique {
    type Err = FoldError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "presto" => Ok(FoldTechnique::Presto),
            "pulsarx" => Ok(FoldTechnique::Pulsarx),
            other => Err(FoldError::config(format!(
                "Invalid fold technique: {other}. Valid options are 'presto' or 'pulsarx'."
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FoldingAlgorithm {
    Render,
    Dspsr,
    Presto,
}

impl FoldingAlgorithm {
    pub fn flag(self) -> &'static str {
        match self {
            FoldingAlgorithm::Render => "--render",
            FoldingAlgorithm::Dspsr => "--dspsr",
            FoldingAlgorithm::Presto => "--presto",
        }
    }
}

impl FromStr for FoldingAlgorithm {
    type Err = FoldError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "render" => Ok(FoldingAlgorithm::Render),
            "dspsr" => Ok(FoldingAlgorithm::Dspsr),
            "presto" => Ok(FoldingAlgorithm::Presto),
            other => Err(FoldError::config(format!(
                "Invalid PulsarX folding algorithm: {other}. Valid options are 'render', 'dspsr', or 'presto'."
            ))),
        }
    }
}

/// PulsarX beam selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BeamTag {
    Incoherent,
    Index(String),
}

impl BeamTag {
    pub fn args(&self) -> Vec<String> {
        match self {
            BeamTag::Incoherent => vec!["--incoherent".to_string()],
            BeamTag::Index(idx) => vec!["-i".to_string(), idx.clone()],
        }
    }
}

/// `ifbf*` is the incoherent beam, `cfbfNNNNN` a coherent beam numbered by its suffix,
/// anything else must end in digits that PulsarX takes as the beam index.
pub fn parse_beam_tag(name: &str) -> Result<BeamTag> {
    if name.contains("ifbf") {
        return Ok(BeamTag::Incoherent);
    }
    if name.contains("cfbf") {
        let digits = name.trim_matches(|c: char| c == 'c' || c == 'f' || c == 'b');
        let index = digits.parse::<u64>().map_err(|_| {
            FoldError::config(format!("cannot read a beam number from beam name '{name}'"))
        })?;
        return Ok(BeamTag::Index(index.to_string()));
    }
    let prefix_len = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let suffix = &name[prefix_len..];
    if suffix.is_empty() {
        return Err(FoldError::config(format!(
            "beam name '{name}' does not end in a beam number"
        )));
    }
    Ok(BeamTag::Index(suffix.to_string()))
}

/// One `--rfi zap <start> <end>` entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelZap {
    pub start: u32,
    pub end: u32,
}

impl ChannelZap {
    pub fn args(&self) -> [String; 4] {
        [
            "--rfi".to_string(),
            "zap".to_string(),
            self.start.to_string(),
            self.end.to_string(),
        ]
    }
}

/// Parse `start:end[,start:end...]`. An empty string means no zapping; any malformed entry
/// rejects the whole mask.
pub fn parse_channel_mask(raw: &str) -> Result<Vec<ChannelZap>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|entry| -> Result<ChannelZap> {
            let malformed =
                || FoldError::config(format!("Unable to parse channel mask entry '{entry}'"));
            let (start, end) = entry.split_once(':').ok_or_else(malformed)?;
            Ok(ChannelZap {
                start: start.trim().parse().map_err(|_| malformed())?,
                end: end.trim().parse().map_err(|_| malformed())?,
            })
        })
        .collect()
}

/// Bin-plan arguments: a custom plan verbatim, else `-b <low> --nbinplan 0.01 <high>`.
pub fn bin_plan_args(custom: Option<&str>, nbins_low: u32, nbins_high: u32) -> Result<Vec<String>> {
    match custom.map(str::trim) {
        Some(plan) => {
            if !plan.starts_with("-b") {
                return Err(FoldError::config(format!(
                    "Custom nbin plan must start with '-b', got '{plan}'"
                )));
            }
            Ok(plan.split_whitespace().map(str::to_string).collect())
        }
        None => Ok(vec![
            "-b".to_string(),
            nbins_low.to_string(),
            "--nbinplan".to_string(),
            "0.01".to_string(),
            nbins_high.to_string(),
        ]),
    }
}
