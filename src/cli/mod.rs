//! The LaserPost test runner command-line interface.
//!
//! Parses arguments, loads the test collection, runs the (test, post) matrix
//! and reports the outcome. Fatal problems are rendered as `miette`
//! diagnostics; failed pairs only affect the exit code.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::args::LaserpostArgs;
use crate::errors::Result;
use crate::process::ProcessRunner;
use crate::report::{write_json, ConsoleReporter};
use crate::runner::{Harness, RunSummary};
use crate::setup::TestSuiteCollection;
use crate::validators::ValidatorRegistry;

pub mod args;

/// The main entry point for the CLI.
pub fn run() {
    let args = LaserpostArgs::parse();
    init_tracing(args.verbose);

    match execute(&args) {
        Ok(summary) if summary.is_success() => {}
        Ok(_) => process::exit(1),
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            process::exit(2);
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` raises the default level to debug.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn execute(args: &LaserpostArgs) -> Result<RunSummary> {
    let collection = TestSuiteCollection::load(&args.config)?;
    let options = args.to_options();
    let registry = ValidatorRegistry::with_defaults();
    let runner = ProcessRunner::new(options.timeout);
    tracing::debug!(
        config = %args.config.display(),
        tests = collection.tests.len(),
        snapshot = %options.snapshot_mode,
        "loaded test collection"
    );

    let mut reporter = ConsoleReporter::stdout(options.verbose);
    let summary = Harness::new(&options, &registry, &runner).run_tests(&collection, &mut reporter);
    reporter.print_summary(&summary);

    if let Some(path) = &args.json {
        write_json(&summary, path)?;
    }
    Ok(summary)
}
