use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use peasoup_fold::args::Args;
use peasoup_fold::exec::TracingSink;
use peasoup_fold::pipeline::{run, FoldReport, RunConfig};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    if std::env::args_os().len() == 1 {
        let _ = Args::command().print_help();
        println!();
        return ExitCode::FAILURE;
    }

    let args = Args::parse();
    init_logging(args.verbose);
    debug!("{args:?}");

    let outcome = RunConfig::from_args(&args).and_then(|config| run(&config, &TracingSink));
    match outcome {
        Ok(summary) => {
            match &summary.report {
                FoldReport::Skipped => info!("Nothing was folded."),
                FoldReport::Presto(outcomes) => {
                    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                    info!(
                        "Done: {} of {} candidates folded with prepfold.",
                        outcomes.len() - failed,
                        outcomes.len()
                    );
                }
                FoldReport::Pulsarx(_) => {
                    info!("Done: {} candidates folded with PulsarX.", summary.selected)
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
