//! Isolated storage folders for each (test, post) pair.
//!
//! Layout:
//! - `<results_root>/<test>/<post>/` receives the CNC fixture and everything the
//!   post-processor writes; it is emptied before every run.
//! - `<snapshot_root>/<test>/<post>/` holds the baseline snapshots and persists
//!   across runs.
//!
//! Test and post names become path segments through [`sanitize_segment`], which
//! keeps distinct names in distinct folders.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::Failure;
use crate::options::CommandOptions;
use crate::setup::ResolvedSetup;

static UNSAFE_SEGMENT_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));

/// Folders prepared for one (test, post) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageFolders {
    /// Per-run artifact folder.
    pub cnc_path: PathBuf,
    /// Baseline snapshot folder.
    pub snapshot_path: PathBuf,
    /// The CNC fixture copied into `cnc_path`.
    pub cnc_file: PathBuf,
}

/// Length of the digest suffix added to rewritten segments.
const DIGEST_CHARS: usize = 8;

/// Turns a test or post name into a single safe path segment.
///
/// Names that are already safe are kept verbatim. Any name the cleanup had to
/// rewrite gets a short digest of the raw name appended, so distinct names
/// never share a folder.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned = UNSAFE_SEGMENT_CHARS.replace_all(name.trim(), "_");
    let cleaned = cleaned.trim_matches('.');
    if !cleaned.is_empty() && cleaned == name {
        return cleaned.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let stem = if cleaned.is_empty() { "_" } else { cleaned };
    format!("{}-{}", stem, &digest[..DIGEST_CHARS])
}

pub(crate) fn cnc_file_name(cnc: &str) -> String {
    if Path::new(cnc).extension().map_or(false, |e| e == "cnc") {
        cnc.to_string()
    } else {
        format!("{}.cnc", cnc)
    }
}

/// Prepares the results and snapshot folders for `setup.posts[post_index]`.
///
/// The results folder is recreated empty so stale artifacts from a previous run
/// can never be validated, then the CNC fixture is copied into it.
pub fn prepare_storage(
    setup: &ResolvedSetup,
    post_index: usize,
    options: &CommandOptions,
) -> Result<StorageFolders, Failure> {
    let test_segment = sanitize_segment(&setup.name);
    let post_segment = sanitize_segment(&setup.posts[post_index]);

    let cnc_path = options.results_root.join(&test_segment).join(&post_segment);
    let snapshot_path = options.snapshot_root.join(&test_segment).join(&post_segment);

    if cnc_path.exists() {
        fs::remove_dir_all(&cnc_path).map_err(|e| Failure::io("clear", &cnc_path, &e))?;
    }
    fs::create_dir_all(&cnc_path).map_err(|e| Failure::io("create", &cnc_path, &e))?;
    fs::create_dir_all(&snapshot_path).map_err(|e| Failure::io("create", &snapshot_path, &e))?;

    let file_name = cnc_file_name(setup.cnc.as_deref().unwrap_or_default());
    let source = options.cnc_root.join(&file_name);
    let cnc_file = cnc_path.join(&file_name);
    fs::copy(&source, &cnc_file).map_err(|e| Failure::io("copy CNC fixture", &source, &e))?;
    tracing::debug!(
        test = %setup.name,
        post = %setup.posts[post_index],
        results = %cnc_path.display(),
        "prepared storage"
    );

    Ok(StorageFolders {
        cnc_path,
        snapshot_path,
        cnc_file,
    })
}
