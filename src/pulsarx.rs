use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};

use crate::args::{bin_plan_args, parse_beam_tag, parse_channel_mask, FoldingAlgorithm};
use crate::candidate::CandidateTable;
use crate::error::{FoldError, Result};
use crate::exec::{maybe_wrap, run_streaming, CommandSpec, ContainerWrap, Invocation, LineSink};
use crate::utils::round_to;
use crate::xml::Observation;

pub const CANDFILE_NAME: &str = "pulsarx.candfile";

#[derive(Debug, Clone)]
pub struct PulsarxConfig {
    pub binary: String,
    pub threads: usize,
    pub template: String,
    pub nbins_high: u32,
    pub nbins_low: u32,
    pub subint_length: Option<u64>,
    pub nsubband: u32,
    pub clfd_q_value: f64,
    pub rfi_filter: Option<String>,
    pub chan_mask: String,
    pub beam_name: String,
    pub utc_beam: String,
    pub output_rootname: Option<String>,
    pub custom_nbin_plan: Option<String>,
    pub algorithm: FoldingAlgorithm,
    pub pepoch_override: Option<f64>,
    pub start_frac: Option<f64>,
    pub end_frac: Option<f64>,
    pub coherent_dm: Option<f64>,
    pub extra_args: Vec<String>,
    pub flush_interval: Duration,
}

impl Default for PulsarxConfig {
    fn default() -> Self {
        Self {
            binary: "psrfold_fil2".to_string(),
            threads: 24,
            template: "meerkat_fold.template".to_string(),
            nbins_high: 128,
            nbins_low: 64,
            subint_length: None,
            nsubband: 64,
            clfd_q_value: 2.0,
            rfi_filter: None,
            chan_mask: String::new(),
            beam_name: "cfbf00000".to_string(),
            utc_beam: "2024-01-01-00:00:00".to_string(),
            output_rootname: None,
            custom_nbin_plan: None,
            algorithm: FoldingAlgorithm::Render,
            pepoch_override: None,
            start_frac: None,
            end_frac: None,
            coherent_dm: None,
            extra_args: Vec::new(),
            flush_interval: crate::exec::DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Epoch, span and DM handed to PulsarX after applying user overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoldWindow {
    pub pepoch: f64,
    pub start_frac: f64,
    pub end_frac: f64,
    pub coherent_dm: f64,
    pub subint_length: u64,
}

pub fn resolve_fold_window(obs: &Observation, config: &PulsarxConfig) -> FoldWindow {
    let total = obs.total_nsamples as f64;
    let pepoch = match config.pepoch_override {
        Some(v) => {
            info!("Using user-provided pepoch = {v}");
            v
        }
        None => {
            info!("Using pepoch from XML = {}", obs.segment_pepoch);
            obs.segment_pepoch
        }
    };
    let start_frac = match config.start_frac {
        Some(v) => {
            info!("Using user-provided start_frac = {v}");
            v
        }
        None => {
            let v = round_to(obs.segment_start_sample as f64 / total, 3);
            info!("Using start_frac derived from XML = {v}");
            v
        }
    };
    let end_frac = match config.end_frac {
        Some(v) => {
            info!("Using user-provided end_frac = {v}");
            v
        }
        None => {
            let end = (obs.segment_start_sample + obs.segment_nsamples) as f64;
            let v = round_to(end / total, 3);
            info!("Using end_frac derived from XML = {v}");
            v
        }
    };
    let coherent_dm = match config.coherent_dm {
        Some(v) => {
            info!("Using user-provided coherent DM = {v}");
            v
        }
        None => {
            info!("Using coherent DM from XML = {}", obs.coherent_dm);
            obs.coherent_dm
        }
    };
    let subint_length = config
        .subint_length
        .unwrap_or((obs.effective_tobs() / 64.0) as u64);

    FoldWindow {
        pepoch,
        start_frac,
        end_frac,
        coherent_dm,
        subint_length,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandfileSchema {
    Acceleration,
    Keplerian,
}

/// Candidate-description text. The schema is chosen once for the whole table from the
/// first row; ids are the row positions, not the candidate ids.
pub fn render_candfile(table: &CandidateTable) -> (CandfileSchema, String) {
    let mut out = String::new();
    if table.is_keplerian() {
        out.push_str("#id DM accel F0 F1 F2 PB A1 T0 OM ECC S/N\n");
        for (i, c) in table.iter().enumerate() {
            let _ = writeln!(
                out,
                "{i} {:?} 0 {:?} 0 0 {:?} {:?} {:?} {:?} {:?} {:?}",
                c.dm,
                1.0 / c.period,
                c.pb,
                c.a1,
                c.t0,
                c.omega,
                c.ecc,
                c.snr
            );
        }
        (CandfileSchema::Keplerian, out)
    } else {
        out.push_str("#id DM accel F0 F1 F2 S/N\n");
        for (i, c) in table.iter().enumerate() {
            let _ = writeln!(out, "{i} {:?} {:?} {:?} 0 0 {:?}", c.dm, c.acc, 1.0 / c.period, c.snr);
        }
        (CandfileSchema::Acceleration, out)
    }
}

pub fn write_candfile(table: &CandidateTable, dir: &Path) -> Result<(CandfileSchema, PathBuf)> {
    let (schema, text) = render_candfile(table);
    let path = dir.join(CANDFILE_NAME);
    std::fs::write(&path, text)?;
    match schema {
        CandfileSchema::Keplerian => {
            info!("Generated Keplerian PulsarX candidate file: {}", path.display())
        }
        CandfileSchema::Acceleration => {
            info!("Generated Accel Search PulsarX candidate file: {}", path.display())
        }
    }
    Ok((schema, path))
}

pub fn pulsarx_command(
    obs: &Observation,
    config: &PulsarxConfig,
    window: &FoldWindow,
    candfile: &Path,
    workdir: &Path,
) -> Result<CommandSpec> {
    let bin_plan = bin_plan_args(
        config.custom_nbin_plan.as_deref(),
        config.nbins_low,
        config.nbins_high,
    )?;
    let beam = parse_beam_tag(&config.beam_name)?;
    let zaps = parse_channel_mask(&config.chan_mask)?;
    let rootname = config
        .output_rootname
        .clone()
        .unwrap_or_else(|| config.utc_beam.clone());

    let mut spec = CommandSpec::new(&config.binary)
        .current_dir(workdir)
        .args(["-v", "--output_width", "--cdm"])
        .arg(format!("{:?}", window.coherent_dm))
        .arg("-t")
        .arg(config.threads.to_string())
        .arg("--candfile")
        .arg(candfile.to_string_lossy())
        .arg("-n")
        .arg(config.nsubband.to_string())
        .args(bin_plan)
        .args(beam.args())
        .arg("--template")
        .arg(&config.template)
        .arg("--clfd")
        .arg(format!("{:?}", config.clfd_q_value))
        .arg("-L")
        .arg(window.subint_length.to_string())
        .arg("-f")
        .args(obs.infilename.split_whitespace());
    for zap in &zaps {
        spec = spec.args(zap.args());
    }
    spec = spec
        .arg("-o")
        .arg(rootname)
        .arg("--srcname")
        .arg(&obs.source_name)
        .arg("--pepoch")
        .arg(format!("{:?}", window.pepoch))
        .arg("--frac")
        .arg(format!("{:?}", window.start_frac))
        .arg(format!("{:?}", window.end_frac))
        .arg(config.algorithm.flag());
    if let Some(filter) = config.rfi_filter.as_deref() {
        spec = spec.arg("--rfi").args(filter.split_whitespace());
    }
    Ok(spec.args(config.extra_args.iter().cloned()))
}

/// Fold the whole table with one PulsarX run. Output is streamed into `sink`;
/// a non-zero exit status fails the run.
pub fn fold_with_pulsarx(
    table: &CandidateTable,
    obs: &Observation,
    config: &PulsarxConfig,
    workdir: &Path,
    container: Option<&ContainerWrap>,
    sink: &dyn LineSink,
) -> Result<Invocation> {
    if table.is_empty() {
        return Err(FoldError::data("no candidates to fold with PulsarX"));
    }
    if config.threads == 0 {
        return Err(FoldError::config("PulsarX thread count must be at least 1"));
    }
    let window = resolve_fold_window(obs, config);
    let (_, candfile) = write_candfile(table, workdir)?;
    let spec = pulsarx_command(obs, config, &window, &candfile, workdir)?;
    let spec = maybe_wrap(spec, container);
    info!("Running PulsarX on {} candidates", table.len());

    let inv = run_streaming(&spec, sink, config.flush_interval)?;
    if !inv.success() {
        error!(
            "{} returned non-zero exit status {}",
            config.binary,
            inv.code_or_signal()
        );
        return Err(FoldError::ToolFailed {
            program: config.binary.clone(),
            code: inv.code_or_signal(),
        });
    }
    info!("PulsarX finished in {:.1} s", inv.elapsed.as_secs_f64());
    Ok(inv)
}
