//! LaserPost Harness Error Handling
//!
//! Two families of errors live here, and they never mix:
//!
//! - [`Failure`]: a *recorded* failure for one (test, post) pair or one validator
//!   invocation. Failures are absorbed by the component that detects them and
//!   converted into a counted fail plus a human-readable message. They never
//!   cross a component boundary as an `Err`.
//! - [`HarnessError`]: a *fatal* problem with the run itself (unreadable test
//!   collection, unparsable configuration, unusable paths). These surface as
//!   `miette` diagnostics from the binary.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

// ============================================================================
// RECORDED FAILURES
// ============================================================================

/// Type-safe classification of recorded failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Setup missing a CNC target or posts list.
    Configuration,
    /// Setup inheritance could not be resolved.
    SetupResolution,
    /// Unrecognized validator kind or unusable pattern.
    Dispatch,
    /// Validator engine produced no usable outcome.
    Engine,
    /// Validator engine ran and explicitly reported failure.
    Validation,
    /// Snapshot differs from the baseline.
    SnapshotMismatch,
    /// Baseline absent and the snapshot mode disallows creation.
    SnapshotMissing,
    /// The external post-processor did not complete successfully.
    Process,
    /// The post ran but no validator matched any artifact.
    NoCoverage,
    /// Reading or writing an artifact or snapshot failed.
    Io,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "Configuration",
            FailureKind::SetupResolution => "SetupResolution",
            FailureKind::Dispatch => "Dispatch",
            FailureKind::Engine => "Engine",
            FailureKind::Validation => "Validation",
            FailureKind::SnapshotMismatch => "SnapshotMismatch",
            FailureKind::SnapshotMissing => "SnapshotMissing",
            FailureKind::Process => "Process",
            FailureKind::NoCoverage => "NoCoverage",
            FailureKind::Io => "Io",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure recorded against a (test, post) pair.
///
/// The `Display` output is the message shown in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("Invalid setup: {0}")]
    Configuration(String),

    #[error("Unable to resolve setup: {0}")]
    SetupResolution(String),

    #[error("Unknown validator \"{kind}\" on \"{key}\" for \"{file}\".")]
    UnknownValidator {
        kind: String,
        key: String,
        file: String,
    },

    #[error("Invalid pattern \"{pattern}\" on \"{key}\": {reason}")]
    InvalidPattern {
        pattern: String,
        key: String,
        reason: String,
    },

    #[error("Validator failed to return any results.")]
    EngineFailure,

    #[error("{0}")]
    Validation(String),

    #[error("Snapshots do not match.")]
    SnapshotMismatch { diff: String },

    #[error("Snapshot does not exist (see \"--snapshot create\").")]
    SnapshotMissing,

    #[error("Post-processor failed to execute.")]
    ProcessFailure,

    #[error("No validators matched any artifact.")]
    NoCoverage,

    #[error("Unable to {action} \"{}\": {reason}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::Configuration(_) => FailureKind::Configuration,
            Failure::SetupResolution(_) => FailureKind::SetupResolution,
            Failure::UnknownValidator { .. } | Failure::InvalidPattern { .. } => {
                FailureKind::Dispatch
            }
            Failure::EngineFailure => FailureKind::Engine,
            Failure::Validation(_) => FailureKind::Validation,
            Failure::SnapshotMismatch { .. } => FailureKind::SnapshotMismatch,
            Failure::SnapshotMissing => FailureKind::SnapshotMissing,
            Failure::ProcessFailure => FailureKind::Process,
            Failure::NoCoverage => FailureKind::NoCoverage,
            Failure::Io { .. } => FailureKind::Io,
        }
    }

    /// Builds an I/O failure from a `std::io::Error`.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Failure::Io {
            action,
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

// ============================================================================
// FATAL HARNESS ERRORS
// ============================================================================

/// Errors that stop the harness before or outside the test matrix.
#[derive(Debug, Error, Diagnostic)]
pub enum HarnessError {
    #[error("Failed to read test collection '{}'", .path.display())]
    #[diagnostic(
        code(laserpost::config::read),
        help("pass the path to a tests.yaml or tests.json file")
    )]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse test collection '{}': {message}", .path.display())]
    #[diagnostic(code(laserpost::config::parse))]
    ParseConfig { path: PathBuf, message: String },

    #[error("Unsupported test collection format '{}'", .path.display())]
    #[diagnostic(
        code(laserpost::config::format),
        help("use a .yaml, .yml or .json extension")
    )]
    UnsupportedFormat { path: PathBuf },

    #[error("Unknown setup \"{name}\"")]
    #[diagnostic(
        code(laserpost::setup::unknown),
        help("declare the setup under `setups:` in the test collection")
    )]
    UnknownSetup { name: String },

    #[error("Setup inheritance cycle: {chain}")]
    #[diagnostic(code(laserpost::setup::cycle))]
    InheritanceCycle { chain: String },

    #[error("I/O error on '{}'", .path.display())]
    #[diagnostic(code(laserpost::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize run report: {0}")]
    #[diagnostic(code(laserpost::report))]
    Report(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
