//! Defines the command-line arguments for the LaserPost test runner.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::options::{CommandOptions, SnapshotMode, DEFAULT_TIMEOUT_SECS};

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "laserpost-test",
    version,
    about = "Runs the LaserPost post-processors against CNC fixtures and checks their artifacts against baseline snapshots."
)]
pub struct LaserpostArgs {
    /// Test collection file (.yaml, .yml or .json).
    #[arg(default_value = "tests/tests.yaml")]
    pub config: PathBuf,

    /// Only run tests whose name contains this text (case-insensitive, repeatable).
    #[arg(short = 't', long = "test", value_name = "NAME")]
    pub tests: Vec<String>,

    /// Only run posts whose name contains this text (case-insensitive, repeatable).
    #[arg(short = 'p', long = "post", value_name = "POST")]
    pub posts: Vec<String>,

    /// Baseline snapshot policy.
    #[arg(short = 's', long, value_enum, default_value_t = SnapshotMode::NoWrite)]
    pub snapshot: SnapshotMode,

    /// Show matching snapshots and debug logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Folder holding the `.cnc` fixtures.
    #[arg(long, default_value = "tests/cnc")]
    pub cnc_root: PathBuf,

    /// Folder holding the `.cps` post scripts.
    #[arg(long, default_value = "src")]
    pub post_root: PathBuf,

    /// Folder receiving per-run artifacts.
    #[arg(long, default_value = "tests/results")]
    pub results_root: PathBuf,

    /// Folder holding baseline snapshots.
    #[arg(long, default_value = "tests/snapshots")]
    pub snapshot_root: PathBuf,

    /// Post-processor executable.
    #[arg(long, env = "LASERPOST_POST_EXE", default_value = "post")]
    pub post_exe: PathBuf,

    /// Seconds a single post-processor run may take before it is killed.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Count posts that matched no validator as failures.
    #[arg(long)]
    pub strict_coverage: bool,

    /// Also write the full run summary as JSON to this file.
    #[arg(long, value_name = "PATH")]
    pub json: Option<PathBuf>,
}

impl LaserpostArgs {
    pub fn to_options(&self) -> CommandOptions {
        CommandOptions {
            tests: self.tests.clone(),
            post_filter: self.posts.clone(),
            snapshot_mode: self.snapshot,
            verbose: self.verbose,
            cnc_root: self.cnc_root.clone(),
            post_root: self.post_root.clone(),
            results_root: self.results_root.clone(),
            snapshot_root: self.snapshot_root.clone(),
            post_executable: self.post_exe.clone(),
            timeout: Duration::from_secs(self.timeout),
            strict_coverage: self.strict_coverage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = LaserpostArgs::try_parse_from(["laserpost-test"]).unwrap();
        let options = args.to_options();
        assert_eq!(args.config, PathBuf::from("tests/tests.yaml"));
        assert_eq!(options.snapshot_mode, SnapshotMode::NoWrite);
        assert_eq!(options.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(options.tests.is_empty());
    }

    #[test]
    fn repeatable_filters_and_snapshot_mode() {
        let args = LaserpostArgs::try_parse_from([
            "laserpost-test",
            "suite.json",
            "-t",
            "circles",
            "--test",
            "squares",
            "-p",
            "lbrn",
            "-s",
            "create",
            "--timeout",
            "5",
        ])
        .unwrap();
        let options = args.to_options();
        assert_eq!(args.config, PathBuf::from("suite.json"));
        assert_eq!(options.tests, vec!["circles".to_string(), "squares".to_string()]);
        assert_eq!(options.post_filter, vec!["lbrn".to_string()]);
        assert_eq!(options.snapshot_mode, SnapshotMode::Create);
        assert_eq!(options.timeout, Duration::from_secs(5));
    }

    #[test]
    fn unknown_snapshot_mode_is_rejected() {
        assert!(LaserpostArgs::try_parse_from(["laserpost-test", "-s", "always"]).is_err());
    }
}
