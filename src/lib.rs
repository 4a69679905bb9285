//! # LaserPost Harness
//!
//! Regression test harness for CAM post-processors. For every selected
//! (test, post) pair it runs the post-processor against a CNC fixture in an
//! isolated folder, reduces each produced artifact to a canonical snapshot with
//! a pluggable validator engine, and checks the snapshot against a stored
//! baseline.
//!
//! ## Module Structure
//!
//! - **`setup`**: test collection loading and setup inheritance
//! - **`storage`** / **`process`**: per-pair folders and post-processor runs
//! - **`validators`** / **`dispatch`**: validator engines and their dispatch
//! - **`snapshot`** / **`diff`**: baseline lifecycle and line diffs
//! - **`runner`**: the test case and test suite runners
//! - **`report`** / **`cli`**: console output and the command-line front end

pub use crate::errors::{Failure, FailureKind, HarnessError};
pub use crate::options::{CommandOptions, SnapshotMode};
pub use crate::runner::{EntryStatus, Harness, RunSummary, SummaryEntry};

pub mod cli;
pub mod diff;
pub mod dispatch;
pub mod errors;
pub mod matching;
pub mod options;
pub mod process;
pub mod report;
pub mod runner;
pub mod setup;
pub mod snapshot;
pub mod storage;
pub mod validators;
