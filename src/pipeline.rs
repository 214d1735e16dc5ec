use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::args::{
    bin_plan_args, parse_beam_tag, parse_channel_mask, Args, FoldTechnique, FoldingAlgorithm,
};
use crate::avoid::{apply_avoid_list, read_avoid_list, AvoidWindow, AVOIDED_CANDIDATES_FILE};
use crate::candidate::{CandidateTable, FloatFormat};
use crate::error::{FoldError, Result};
use crate::exec::{ContainerWrap, Invocation, LineSink, DEFAULT_FLUSH_INTERVAL};
use crate::presto::{fold_with_presto, FoldOutcome, PrestoConfig};
use crate::pulsarx::{fold_with_pulsarx, PulsarxConfig};
use crate::select::{apply_selection, FilterSpec};
use crate::utils::{available_cores, split_tokens};
use crate::xml::parse_candidate_xml;

/// Digits written for float columns of the selected-candidates audit file.
pub const AUDIT_FLOAT_DIGITS: usize = 18;

/// Everything one run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input_file: PathBuf,
    pub output_dir: PathBuf,
    pub publish_dir: Option<PathBuf>,
    pub selection_file: Option<PathBuf>,
    pub avoid_file: Option<PathBuf>,
    pub filtered_candidates_file: PathBuf,
    pub technique: FoldTechnique,
    pub presto: PrestoConfig,
    pub pulsarx: PulsarxConfig,
    pub container: Option<ContainerWrap>,
}

fn check_threads(label: &str, requested: usize) -> Result<()> {
    if requested == 0 {
        return Err(FoldError::config(format!("--{label} must be at least 1")));
    }
    let cores = available_cores();
    if requested > cores {
        warn!("--{label} ({requested}) exceeds the number of available cores ({cores})");
    }
    Ok(())
}

impl RunConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let input_file = args
            .input_file
            .clone()
            .ok_or_else(|| FoldError::config("You need to provide an XML file to read."))?;
        let output_dir = match &args.output_path {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let technique: FoldTechnique = args.fold_technique.parse()?;
        let algorithm: FoldingAlgorithm = args.pulsarx_folding_algorithm.parse()?;
        let extra_args = split_tokens(args.extra_args.as_deref());

        match technique {
            FoldTechnique::Presto => check_threads("presto-threads", args.presto_threads)?,
            FoldTechnique::Pulsarx => {
                check_threads("pulsarx-threads", args.pulsarx_threads)?;
                parse_beam_tag(&args.beam_name)?;
                parse_channel_mask(&args.chan_mask)?;
                bin_plan_args(args.custom_nbin_plan.as_deref(), args.nbins_low, args.nbins_high)?;
            }
        }

        let presto = PrestoConfig {
            binary: args.prepfold_bin.clone(),
            threads: args.presto_threads,
            mask: args.mask_file.clone(),
            extra_args: extra_args.clone(),
        };
        let pulsarx = PulsarxConfig {
            binary: args.pulsarx_bin.clone(),
            threads: args.pulsarx_threads,
            template: args.pulsarx_fold_template.clone(),
            nbins_high: args.nbins_high,
            nbins_low: args.nbins_low,
            subint_length: args.subint_length,
            nsubband: args.nsubband,
            clfd_q_value: args.clfd_q_value,
            rfi_filter: args.rfi_filter.clone(),
            chan_mask: args.chan_mask.clone(),
            beam_name: args.beam_name.clone(),
            utc_beam: args.utc_beam.clone(),
            output_rootname: args.output_rootname.clone(),
            custom_nbin_plan: args.custom_nbin_plan.clone(),
            algorithm,
            pepoch_override: args.pepoch_override,
            start_frac: args.start_frac,
            end_frac: args.end_frac,
            coherent_dm: args.cdm,
            extra_args,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        };
        let container = args.container_image.as_ref().map(|image| ContainerWrap {
            runtime: args.container_runtime.clone(),
            image: image.clone(),
            binds: args.container_bind.clone(),
        });

        Ok(Self {
            input_file,
            output_dir,
            publish_dir: args.filterbank_publish_dir.clone(),
            selection_file: args.config_file.clone(),
            avoid_file: args.avoid_folding_file.clone(),
            filtered_candidates_file: args.filtered_candidates_file.clone(),
            technique,
            presto,
            pulsarx,
            container,
        })
    }

    /// Relative output names live under the output directory.
    pub fn output_path(&self, name: &Path) -> PathBuf {
        self.output_dir.join(name)
    }
}

#[derive(Debug)]
pub enum FoldReport {
    Skipped,
    Presto(Vec<FoldOutcome>),
    Pulsarx(Invocation),
}

#[derive(Debug)]
pub struct RunSummary {
    pub loaded: usize,
    pub avoided: usize,
    pub selected: usize,
    pub report: FoldReport,
}

/// Avoid-list exclusion followed by block selection. Excluded rows are written to
/// `avoided_candidates_to_fold.csv` in `output_dir` whenever windows are given.
pub fn select_for_folding(
    table: &CandidateTable,
    windows: Option<&[AvoidWindow]>,
    spec: Option<&FilterSpec>,
    output_dir: &Path,
) -> Result<(CandidateTable, CandidateTable)> {
    let (working, avoided) = match windows {
        Some(windows) => {
            let outcome = apply_avoid_list(table, windows);
            let path = output_dir.join(AVOIDED_CANDIDATES_FILE);
            outcome.avoided.write_csv(&path, FloatFormat::Shortest)?;
            info!("Saved avoided candidates to '{}'.", path.display());
            (outcome.retained, outcome.avoided)
        }
        None => (table.clone(), CandidateTable::default()),
    };
    Ok((apply_selection(&working, spec), avoided))
}

pub fn run(config: &RunConfig, sink: &dyn LineSink) -> Result<RunSummary> {
    std::fs::create_dir_all(&config.output_dir)?;

    // Parse every optional input up front so a bad file fails before anything is written.
    let windows = config
        .avoid_file
        .as_deref()
        .map(|path| {
            info!("Applying avoid spin period ranges from {}", path.display());
            read_avoid_list(path)
        })
        .transpose()?;
    let spec = config
        .selection_file
        .as_deref()
        .map(|path| {
            info!("Applying folding configuration from {}", path.display());
            FilterSpec::from_path(path)
        })
        .transpose()?;

    let file = parse_candidate_xml(&config.input_file, config.publish_dir.as_deref())?;
    let loaded = file.table.len();
    if windows.is_some() || spec.is_some() {
        info!("XML file contains {loaded} candidates before filtering.");
    } else {
        info!("No configuration file provided, folding all {loaded} candidates.");
    }

    let (selected, avoided) =
        select_for_folding(&file.table, windows.as_deref(), spec.as_ref(), &config.output_dir)?;
    if windows.is_some() || spec.is_some() {
        info!("After filtering, {} candidates remain for folding.", selected.len());
    }

    let audit = config.output_path(&config.filtered_candidates_file);
    info!("Dumping the selected candidates to {}", audit.display());
    selected.write_csv(&audit, FloatFormat::Fixed(AUDIT_FLOAT_DIGITS))?;

    let report = if selected.is_empty() {
        warn!("No candidates left to fold.");
        FoldReport::Skipped
    } else {
        match config.technique {
            FoldTechnique::Presto => {
                info!("Folding with Presto...");
                FoldReport::Presto(fold_with_presto(
                    &selected,
                    &file.observation,
                    &config.presto,
                    &config.output_dir,
                    config.container.as_ref(),
                )?)
            }
            FoldTechnique::Pulsarx => {
                info!("Folding with PulsarX...");
                FoldReport::Pulsarx(fold_with_pulsarx(
                    &selected,
                    &file.observation,
                    &config.pulsarx,
                    &config.output_dir,
                    config.container.as_ref(),
                    sink,
                )?)
            }
        }
    };

    Ok(RunSummary {
        loaded,
        avoided: avoided.len(),
        selected: selected.len(),
        report,
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::RunConfig;
    use crate::args::{Args, FoldTechnique};
    use crate::error::FoldError;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["peasoup_fold"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn missing_input_file_is_a_configuration_error() {
        let err = RunConfig::from_args(&parse(&[])).unwrap_err();
        assert!(matches!(err, FoldError::Config(_)));
    }

    #[test]
    fn invalid_folding_algorithm_is_rejected() {
        let args = parse(&["-i", "x.xml", "--pulsarx-folding-algorithm", "fastest"]);
        let err = RunConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("Invalid PulsarX folding algorithm"));
    }

    #[test]
    fn malformed_channel_mask_is_rejected_up_front() {
        let args = parse(&["-i", "x.xml", "-c", "0:10,20"]);
        assert!(matches!(RunConfig::from_args(&args), Err(FoldError::Config(_))));
    }

    #[test]
    fn container_and_relative_outputs() {
        let args = parse(&[
            "-i",
            "x.xml",
            "-o",
            "/scratch/out",
            "-t",
            "presto",
            "--extra-args",
            "-npart 32",
            "--container-image",
            "/sif/presto.sif",
            "--container-bind",
            "/data",
            "--container-bind",
            "/scratch",
        ]);
        let config = RunConfig::from_args(&args).unwrap();
        assert_eq!(config.technique, FoldTechnique::Presto);
        assert_eq!(config.presto.extra_args, vec!["-npart", "32"]);
        let container = config.container.as_ref().unwrap();
        assert_eq!(container.runtime, "singularity");
        assert_eq!(container.binds, vec!["/data", "/scratch"]);
        assert_eq!(
            config.output_path(&config.filtered_candidates_file),
            std::path::Path::new("/scratch/out/filtered_df_for_folding.csv")
        );
    }
}
