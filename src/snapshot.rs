//! # Snapshot Lifecycle
//!
//! Decides whether a freshly produced snapshot passes, fails, or (re)writes the
//! baseline. The decision depends only on the run's [`SnapshotMode`] and on
//! whether the baseline file exists when the call is made:
//!
//! | Mode               | Baseline        | Verdict                          |
//! |--------------------|-----------------|----------------------------------|
//! | `reset`            | any             | baseline overwritten, success    |
//! | `no-write`/`create`| present, equal  | success, no write                |
//! | `no-write`/`create`| present, differs| failure with diff, no write      |
//! | `create`           | absent          | baseline created, success        |
//! | `no-write`         | absent          | failure, no write                |
//!
//! Baseline writes are whole-file byte copies of the new snapshot.

use std::fs;
use std::path::Path;

use crate::diff::pretty_diff;
use crate::errors::Failure;
use crate::options::SnapshotMode;

/// Outcome of comparing a snapshot against its baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotVerdict {
    /// Baseline exists and is identical.
    Matched,
    /// Baseline was absent and has been created.
    Created,
    /// Baseline was overwritten unconditionally.
    Reset,
    /// Baseline exists and differs; carries the rendered diff.
    Mismatch { diff: String },
    /// Baseline is absent and the mode disallows creating it.
    Missing,
}

impl SnapshotVerdict {
    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// The failure this verdict records, if any.
    pub fn failure(&self) -> Option<Failure> {
        match self {
            SnapshotVerdict::Mismatch { diff } => {
                Some(Failure::SnapshotMismatch { diff: diff.clone() })
            }
            SnapshotVerdict::Missing => Some(Failure::SnapshotMissing),
            _ => None,
        }
    }
}

fn read_snapshot(path: &Path) -> Result<String, Failure> {
    fs::read_to_string(path).map_err(|e| Failure::io("read snapshot", path, &e))
}

/// Compares `new_snapshot_file` with `baseline_snapshot_file` and manages the
/// baseline according to `mode`.
///
/// I/O problems are returned as a [`Failure`]; they never panic.
pub fn snapshot_compare(
    validator_name: &str,
    new_snapshot_file: &Path,
    baseline_snapshot_file: &Path,
    mode: SnapshotMode,
) -> Result<SnapshotVerdict, Failure> {
    let verdict = if mode == SnapshotMode::Reset {
        SnapshotVerdict::Reset
    } else if baseline_snapshot_file.exists() {
        let new_snapshot = read_snapshot(new_snapshot_file)?;
        let baseline_snapshot = read_snapshot(baseline_snapshot_file)?;
        return Ok(match pretty_diff(&baseline_snapshot, &new_snapshot) {
            None => {
                tracing::debug!(validator = validator_name, "snapshots match");
                SnapshotVerdict::Matched
            }
            Some(diff) => {
                tracing::warn!(validator = validator_name, "snapshots do not match");
                SnapshotVerdict::Mismatch { diff }
            }
        });
    } else if mode == SnapshotMode::NoWrite {
        tracing::warn!(
            validator = validator_name,
            baseline = %baseline_snapshot_file.display(),
            "baseline snapshot missing and creation disallowed"
        );
        return Ok(SnapshotVerdict::Missing);
    } else {
        SnapshotVerdict::Created
    };

    if let Some(parent) = baseline_snapshot_file.parent() {
        fs::create_dir_all(parent).map_err(|e| Failure::io("create", parent, &e))?;
    }
    fs::copy(new_snapshot_file, baseline_snapshot_file)
        .map_err(|e| Failure::io("write baseline", baseline_snapshot_file, &e))?;
    tracing::info!(
        validator = validator_name,
        baseline = %baseline_snapshot_file.display(),
        verdict = ?verdict,
        "baseline snapshot written"
    );
    Ok(verdict)
}
