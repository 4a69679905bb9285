//! # LaserPost Harness Test Fixtures
//!
//! Builds a throwaway workspace with a CNC fixture, a test collection and (on
//! unix) a fake post-processor script that writes one artifact per post kind.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;

pub const COLLECTION: &str = r#"
setups:
  base:
    cnc: circles
    posts: [laserpost-lbrn, laserpost-gcode]
    validators:
      layers:
        post: "*lbrn*"
        file: "*.lbrn"
        validator: xpath
        queries:
          - path: //CutSetting
            count: 1
      gcode:
        post: "*gcode*"
        file: "*.gcode"
        validator: text
        exclude: ['^; Generated']
tests:
  - name: Circles
    setup: base
  - name: Squares
    setup: base
    cnc: squares
"#;

/// Keeps the last three arguments (post script, CNC file, output stem) and
/// writes an artifact whose content can be steered through `CUT_TYPE`.
const FAKE_POST: &str = r#"#!/bin/sh
while [ $# -gt 3 ]; do shift; done
script="$1"
out="$3"
case "$script" in
  *lbrn*) printf '<LightBurnProject><CutSetting type="%s"><index Value="0"/></CutSetting></LightBurnProject>\n' "${CUT_TYPE:-Cut}" > "$out.lbrn" ;;
  *) printf '; Generated %s\nG0 X0 Y0\nG1 X10 Y0\n' "$$" > "$out.gcode" ;;
esac
"#;

pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let cnc = root.path().join("cnc");
        fs::create_dir_all(&cnc).unwrap();
        fs::write(cnc.join("circles.cnc"), "circles").unwrap();
        fs::write(cnc.join("squares.cnc"), "squares").unwrap();
        fs::write(root.path().join("tests.yaml"), COLLECTION).unwrap();
        Self { root }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    pub fn snapshot(&self, test: &str, post: &str, key: &str) -> PathBuf {
        self.path("snapshots")
            .join(test)
            .join(post)
            .join(format!("{}.snapshot", key))
    }

    #[cfg(unix)]
    pub fn fake_post(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path("fake-post.sh");
        fs::write(&path, FAKE_POST).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// The runner binary pointed at this workspace.
    pub fn command(&self, post_exe: &PathBuf) -> Command {
        let mut cmd = Command::cargo_bin("laserpost-test").unwrap();
        cmd.current_dir(self.root.path())
            .env_remove("RUST_LOG")
            .arg(self.path("tests.yaml"))
            .arg("--cnc-root")
            .arg(self.path("cnc"))
            .arg("--post-root")
            .arg(self.path("src"))
            .arg("--results-root")
            .arg(self.path("results"))
            .arg("--snapshot-root")
            .arg(self.path("snapshots"))
            .arg("--post-exe")
            .arg(post_exe);
        cmd
    }
}
