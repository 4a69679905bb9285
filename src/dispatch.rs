//! # Validator Dispatch
//!
//! Matches the validators declared by a setup against the artifacts one post
//! produced, invokes the engine registered for each validator kind, persists the
//! resulting snapshot and hands it to the snapshot lifecycle.
//!
//! Every problem met here (unknown kind, bad pattern, engine failure, snapshot
//! drift, I/O) is recorded against the (validator, file) pair that caused it and
//! never stops sibling validators.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::errors::Failure;
use crate::matching::Glob;
use crate::options::CommandOptions;
use crate::setup::{ResolvedSetup, ValidatorSpec};
use crate::snapshot::{snapshot_compare, SnapshotVerdict};
use crate::validators::ValidatorRegistry;

/// Extension of snapshot files, both per-run and baseline.
pub const SNAPSHOT_EXTENSION: &str = "snapshot";

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Outcome of one (validator, file) invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    /// Validator key from the setup.
    pub key: String,
    /// Artifact file; `None` when the failure happened before any file matched.
    pub file: Option<String>,
    pub verdict: Result<SnapshotVerdict, Failure>,
}

impl ValidationRecord {
    fn failed(key: &str, file: Option<&str>, failure: Failure) -> Self {
        tracing::warn!(validator = key, file, failure = %failure, "validation failed");
        Self {
            key: key.to_string(),
            file: file.map(str::to_string),
            verdict: Err(failure),
        }
    }

    pub fn failure(&self) -> Option<Failure> {
        match &self.verdict {
            Ok(verdict) => verdict.failure(),
            Err(failure) => Some(failure.clone()),
        }
    }
}

/// Pass/fail tally for one (setup, post) pair.
///
/// `last_failure` keeps only the most recent message, which is what the console
/// summary shows; `failures` keeps all of them in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostResult {
    pub pass: usize,
    pub fail: usize,
    pub last_failure: Option<String>,
    pub failures: Vec<String>,
    pub records: Vec<ValidationRecord>,
}

impl PostResult {
    pub fn record(&mut self, record: ValidationRecord) {
        match record.failure() {
            Some(failure) => {
                let message = failure.to_string();
                self.fail += 1;
                self.failures.push(message.clone());
                self.last_failure = Some(message);
            }
            None => self.pass += 1,
        }
        self.records.push(record);
    }

    /// No validator matched any artifact of the post.
    pub fn is_uncovered(&self) -> bool {
        self.pass == 0 && self.fail == 0
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

fn compile(pattern: &str, key: &str) -> Result<Glob, Failure> {
    Glob::new(pattern).map_err(|e| Failure::InvalidPattern {
        pattern: pattern.to_string(),
        key: key.to_string(),
        reason: e.msg.to_string(),
    })
}

/// Lists the artifact file names of a post, sorted, excluding snapshot files.
pub fn list_artifacts(cnc_path: &Path) -> Result<Vec<String>, Failure> {
    let mut files = Vec::new();
    for entry in WalkDir::new(cnc_path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Failure::Io {
            action: "list",
            path: cnc_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().map_or(false, |e| e == SNAPSHOT_EXTENSION) {
            continue;
        }
        files.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(files)
}

fn snapshot_file(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", key, SNAPSHOT_EXTENSION))
}

/// Applies one validator to the artifacts of `post`.
///
/// Returns nothing when the post does not match the validator's post pattern.
pub fn dispatch_validator(
    registry: &ValidatorRegistry,
    key: &str,
    spec: &ValidatorSpec,
    post: &str,
    cnc_path: &Path,
    snapshot_path: &Path,
    options: &CommandOptions,
) -> Vec<ValidationRecord> {
    let post_glob = match compile(&spec.post, key) {
        Ok(glob) => glob,
        Err(failure) => return vec![ValidationRecord::failed(key, None, failure)],
    };
    if !post_glob.matches(post) {
        tracing::debug!(validator = key, post, pattern = post_glob.as_str(), "post not matched");
        return Vec::new();
    }
    let file_glob = match compile(&spec.file, key) {
        Ok(glob) => glob,
        Err(failure) => return vec![ValidationRecord::failed(key, None, failure)],
    };
    let files = match list_artifacts(cnc_path) {
        Ok(files) => files,
        Err(failure) => return vec![ValidationRecord::failed(key, None, failure)],
    };

    files
        .iter()
        .filter(|file| file_glob.matches(file))
        .map(|file| invoke(registry, key, spec, file, cnc_path, snapshot_path, options))
        .collect()
}

fn invoke(
    registry: &ValidatorRegistry,
    key: &str,
    spec: &ValidatorSpec,
    file: &str,
    cnc_path: &Path,
    snapshot_path: &Path,
    options: &CommandOptions,
) -> ValidationRecord {
    tracing::debug!(validator = key, kind = %spec.validator, file, "invoking validator");
    let Some(engine) = registry.get(&spec.validator) else {
        let failure = Failure::UnknownValidator {
            kind: spec.validator.clone(),
            key: key.to_string(),
            file: file.to_string(),
        };
        return ValidationRecord::failed(key, Some(file), failure);
    };
    let Some(outcome) = engine.validate(spec, cnc_path, file, options) else {
        return ValidationRecord::failed(key, Some(file), Failure::EngineFailure);
    };

    // Written before any verdict so a failed run still leaves its evidence.
    let new_snapshot = snapshot_file(cnc_path, key);
    if let Err(e) = fs::write(&new_snapshot, &outcome.snapshot) {
        let failure = Failure::io("write snapshot", &new_snapshot, &e);
        return ValidationRecord::failed(key, Some(file), failure);
    }
    if let Some(message) = outcome.failure {
        return ValidationRecord::failed(key, Some(file), Failure::Validation(message));
    }

    let baseline = snapshot_file(snapshot_path, key);
    match snapshot_compare(key, &new_snapshot, &baseline, options.snapshot_mode) {
        Ok(verdict) => ValidationRecord {
            key: key.to_string(),
            file: Some(file.to_string()),
            verdict: Ok(verdict),
        },
        Err(failure) => ValidationRecord::failed(key, Some(file), failure),
    }
}

/// Validates every artifact of `setup.posts[post_index]` against the setup's
/// validators, in declaration order.
pub fn validate_post_results(
    registry: &ValidatorRegistry,
    setup: &ResolvedSetup,
    post_index: usize,
    options: &CommandOptions,
    cnc_path: &Path,
    snapshot_path: &Path,
) -> PostResult {
    let mut result = PostResult::default();
    let post = &setup.posts[post_index];
    for (key, spec) in setup.validators.iter() {
        for record in dispatch_validator(registry, key, spec, post, cnc_path, snapshot_path, options)
        {
            result.record(record);
        }
    }
    result
}
