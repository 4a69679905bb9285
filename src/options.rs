//! Run-wide options shared by every component of the harness.
//!
//! `CommandOptions` is built once by the CLI and passed by reference; nothing
//! mutates it during a run.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;

/// Default timeout for a single post-processor invocation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Policy governing whether missing or mismatched baselines may be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotMode {
    /// Compare only; never write a baseline.
    #[default]
    NoWrite,
    /// Overwrite every baseline with the latest snapshot.
    Reset,
    /// Compare existing baselines; create the ones that are missing.
    Create,
}

impl SnapshotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotMode::NoWrite => "no-write",
            SnapshotMode::Reset => "reset",
            SnapshotMode::Create => "create",
        }
    }
}

impl std::fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options from the command line.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Test-name substrings; empty selects every test.
    pub tests: Vec<String>,
    /// Post-name substrings; empty selects every post.
    pub post_filter: Vec<String>,
    pub snapshot_mode: SnapshotMode,
    pub verbose: bool,
    /// Folder holding the `.cnc` fixtures.
    pub cnc_root: PathBuf,
    /// Folder holding the `.cps` post scripts.
    pub post_root: PathBuf,
    /// Folder receiving per-run artifacts.
    pub results_root: PathBuf,
    /// Folder holding baseline snapshots.
    pub snapshot_root: PathBuf,
    /// Post-processor executable.
    pub post_executable: PathBuf,
    pub timeout: Duration,
    /// Count posts that matched no validator as failures.
    pub strict_coverage: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            tests: Vec::new(),
            post_filter: Vec::new(),
            snapshot_mode: SnapshotMode::default(),
            verbose: false,
            cnc_root: PathBuf::from("tests/cnc"),
            post_root: PathBuf::from("src"),
            results_root: PathBuf::from("tests/results"),
            snapshot_root: PathBuf::from("tests/snapshots"),
            post_executable: PathBuf::from("post"),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            strict_coverage: false,
        }
    }
}

/// Case-insensitive substring selection shared by the test and post filters.
///
/// An empty filter selects everything.
pub fn filter_selects(filters: &[String], name: &str) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = name.to_lowercase();
    filters
        .iter()
        .any(|filter| name.contains(&filter.to_lowercase()))
}

impl CommandOptions {
    pub fn selects_test(&self, name: &str) -> bool {
        filter_selects(&self.tests, name)
    }

    pub fn selects_post(&self, post: &str) -> bool {
        filter_selects(&self.post_filter, post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_selects_everything() {
        assert!(filter_selects(&[], "anything"));
    }

    #[test]
    fn filter_is_case_insensitive_substring() {
        let filters = vec!["GCode".to_string()];
        assert!(filter_selects(&filters, "laserpost-gcode"));
        assert!(!filter_selects(&filters, "lbrn"));
    }

    #[test]
    fn any_token_is_enough() {
        let filters = vec!["nope".to_string(), "circ".to_string()];
        assert!(filter_selects(&filters, "Circles and arcs"));
    }

    #[test]
    fn default_mode_is_no_write() {
        assert_eq!(CommandOptions::default().snapshot_mode, SnapshotMode::NoWrite);
        assert_eq!(SnapshotMode::Create.to_string(), "create");
    }
}
