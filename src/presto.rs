use std::path::{Path, PathBuf};
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::candidate::{CandidateRecord, CandidateTable};
use crate::error::{FoldError, Result};
use crate::exec::{maybe_wrap, run_captured, CommandSpec, ContainerWrap};
use crate::timing::{
    acceleration_to_period_derivative, correct_period_for_drift_prepfold, period_derivatives,
};
use crate::xml::Observation;

/// Periods above this (seconds) are folded with `-slow`.
pub const SLOW_PERIOD_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct PrestoConfig {
    pub binary: String,
    pub threads: usize,
    pub mask: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for PrestoConfig {
    fn default() -> Self {
        Self {
            binary: "prepfold".to_string(),
            threads: 12,
            mask: None,
            extra_args: Vec::new(),
        }
    }
}

/// Per-candidate folding parameters, built right before dispatch.
#[derive(Debug, Clone, Copy)]
pub struct FoldJob<'a> {
    pub cand_id: u64,
    pub fold_period: f64,
    pub pdot: f64,
    pub dm: f64,
    pub observation: &'a Observation,
}

impl<'a> FoldJob<'a> {
    pub fn for_prepfold(cand: &CandidateRecord, observation: &'a Observation) -> Self {
        let pdot = acceleration_to_period_derivative(cand.period, cand.acc);
        Self::with_pdot(cand, pdot, observation)
    }

    /// `pdot` must be the derivative of `cand.period`; the fold period is referred to the FFT midpoint.
    pub fn with_pdot(cand: &CandidateRecord, pdot: f64, observation: &'a Observation) -> Self {
        let fold_period = correct_period_for_drift_prepfold(
            cand.period,
            pdot,
            observation.tsamp,
            observation.fft_size,
        );
        Self {
            cand_id: cand.cand_id,
            fold_period,
            pdot,
            dm: cand.dm,
            observation,
        }
    }

    /// Output names are 1-based while candidate ids are 0-based.
    pub fn output_basename(&self) -> String {
        format!(
            "{}_Peasoup_fold_candidate_id_{}",
            self.observation.source_name,
            self.cand_id + 1
        )
    }

    pub fn command(&self, config: &PrestoConfig, workdir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&config.binary)
            .args(["-fixchi", "-noxwin", "-topo"])
            .current_dir(workdir);
        if self.fold_period > SLOW_PERIOD_THRESHOLD {
            spec = spec.arg("-slow");
        }
        if let Some(mask) = &config.mask {
            spec = spec.arg("-mask").arg(mask.to_string_lossy());
        }
        spec.arg("-p")
            .arg(format!("{:.16}", self.fold_period))
            .arg("-dm")
            .arg(format!("{:.2}", self.dm))
            .arg("-pd")
            .arg(format!("{:.16}", self.pdot))
            .arg("-o")
            .arg(self.output_basename())
            .arg(&self.observation.infilename)
            .args(config.extra_args.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FoldOutcome {
    Folded { cand_id: u64, elapsed: Duration },
    Failed { cand_id: u64, error: String },
}

impl FoldOutcome {
    pub fn cand_id(&self) -> u64 {
        match self {
            FoldOutcome::Folded { cand_id, .. } | FoldOutcome::Failed { cand_id, .. } => *cand_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FoldOutcome::Folded { .. })
    }
}

fn run_job(spec: CommandSpec, cand_id: u64) -> FoldOutcome {
    match run_captured(&spec) {
        Ok(inv) if inv.success() => {
            debug!("Candidate {cand_id} folded in {:.1} s", inv.elapsed.as_secs_f64());
            FoldOutcome::Folded {
                cand_id,
                elapsed: inv.elapsed,
            }
        }
        Ok(inv) => FoldOutcome::Failed {
            cand_id,
            error: inv.error_text(),
        },
        Err(err) => FoldOutcome::Failed {
            cand_id,
            error: err.to_string(),
        },
    }
}

/// Fold each candidate with its own prepfold process on a pool of
/// `min(threads, candidates)` workers. A failing candidate never stops the others.
pub fn fold_with_presto(
    table: &CandidateTable,
    observation: &Observation,
    config: &PrestoConfig,
    workdir: &Path,
    container: Option<&ContainerWrap>,
) -> Result<Vec<FoldOutcome>> {
    if config.threads == 0 {
        return Err(FoldError::config("prepfold thread count must be at least 1"));
    }
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let workers = config.threads.min(table.len());
    info!("Folding {} candidates with {} prepfold workers", table.len(), workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| FoldError::Io(std::io::Error::other(e.to_string())))?;

    let periods: Vec<f64> = table.iter().map(|c| c.period).collect();
    let accs: Vec<f64> = table.iter().map(|c| c.acc).collect();
    let pdots = period_derivatives(&periods, &accs);

    let jobs: Vec<(u64, CommandSpec)> = table
        .iter()
        .zip(pdots)
        .map(|(cand, pdot)| {
            let job = FoldJob::with_pdot(cand, pdot, observation);
            let spec = maybe_wrap(job.command(config, workdir), container);
            (job.cand_id, spec)
        })
        .collect();

    let outcomes: Vec<FoldOutcome> = pool.install(|| {
        jobs.into_par_iter()
            .map(|(cand_id, spec)| run_job(spec, cand_id))
            .collect()
    });

    for outcome in &outcomes {
        if let FoldOutcome::Failed { cand_id, error } = outcome {
            error!("Error with candidate ID {cand_id}: {error}");
        }
    }
    let folded = outcomes.iter().filter(|o| o.is_success()).count();
    info!("prepfold finished: {folded} folded, {} failed", outcomes.len() - folded);
    Ok(outcomes)
}
