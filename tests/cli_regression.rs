// Regression tests for the laserpost-test binary.
// Requires: assert_cmd, predicates, tempfile crates in [dev-dependencies]

mod common;

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};

use common::Workspace;

#[test]
fn help_lists_snapshot_modes() {
    let mut cmd = Command::cargo_bin("laserpost-test").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("--snapshot").and(contains("no-write")));
}

#[test]
fn missing_collection_is_a_miette_diagnostic() {
    let ws = Workspace::new();
    let mut cmd = Command::cargo_bin("laserpost-test").unwrap();
    cmd.arg(ws.path("nope.yaml"));
    cmd.assert()
        .failure()
        .code(2)
        .stderr(contains("laserpost::config::read").or(contains("help:")));
}

#[test]
fn unparsable_collection_is_reported() {
    let ws = Workspace::new();
    fs::write(ws.path("broken.json"), "{ \"tests\": [").unwrap();
    let mut cmd = Command::cargo_bin("laserpost-test").unwrap();
    cmd.arg(ws.path("broken.json"));
    cmd.assert()
        .failure()
        .code(2)
        .stderr(contains("Failed to parse test collection"));
}

#[test]
fn missing_post_executable_fails_every_pair() {
    let ws = Workspace::new();
    let exe = PathBuf::from("definitely-not-a-real-post-exe");
    ws.command(&exe)
        .args(["-t", "circles"])
        .assert()
        .failure()
        .code(1)
        .stdout(contains("Post-processor failed to execute.").and(contains("failed 2")));
}

#[cfg(unix)]
#[test]
fn snapshot_lifecycle_end_to_end() {
    let ws = Workspace::new();
    let exe = ws.fake_post();

    // No baselines yet: no-write refuses to create them.
    ws.command(&exe)
        .assert()
        .failure()
        .stdout(contains("--snapshot create"));
    assert!(!ws.snapshot("Circles", "laserpost-lbrn", "layers").exists());

    // create records them.
    ws.command(&exe)
        .args(["-s", "create"])
        .assert()
        .success()
        .stdout(contains("saving snapshot").and(contains("passed 4")));
    assert!(ws.snapshot("Circles", "laserpost-lbrn", "layers").exists());
    assert!(ws.snapshot("Squares", "laserpost-gcode", "gcode").exists());

    // Unchanged output matches; the excluded banner line differs per run.
    ws.command(&exe)
        .arg("-v")
        .assert()
        .success()
        .stdout(contains("Snapshots match"));

    // Drift in one post fails only the lbrn pairs.
    let report = ws.path("report.json");
    ws.command(&exe)
        .env("CUT_TYPE", "Scan")
        .arg("--json")
        .arg(&report)
        .assert()
        .failure()
        .code(1)
        .stdout(contains("Snapshots do not match").and(contains("+")));
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["pass"], 2);
    assert_eq!(json["fail"], 2);

    // reset accepts the new output.
    ws.command(&exe)
        .env("CUT_TYPE", "Scan")
        .args(["-s", "reset", "-p", "lbrn"])
        .assert()
        .success()
        .stdout(contains("Resetting snapshot to latest."));
    let baseline = fs::read_to_string(ws.snapshot("Circles", "laserpost-lbrn", "layers")).unwrap();
    assert!(baseline.contains("type=\"Scan\""));
}
