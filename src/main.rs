//! epfuzz entrypoint: parse flags, init tracing, dispatch, map to exit code.
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ep_fuzz::cli::RootArgs;
use ep_fuzz::harness::{run_harness, HarnessConfig};
use ep_fuzz::summary;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    if let Some(report_path) = &args.analyze {
        return match summary::analyze(report_path) {
            Ok(report) if summary::report_indicates_failure(&report) => ExitCode::FAILURE,
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        };
    }

    let cfg = HarnessConfig::from_args(&args);
    match run_harness(&cfg) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(outcome)) => {
            summary::print_summary(&outcome.report, Some(&outcome.report_path));
            if outcome.report.any_hard_fail() || outcome.coverage_gate_failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            // Setup errors: reported before any scenario ran.
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
