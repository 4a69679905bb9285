//! # Test Runners
//!
//! Drives the (test, post) matrix: resolves each selected suite's setup, runs
//! the post-processor once per selected post in an isolated folder, validates
//! the artifacts, and appends one [`SummaryEntry`] per pair.
//!
//! Execution is strictly sequential and never fails fast; every problem becomes
//! a failed entry and the run continues. Progress is reported through a
//! [`ProgressSink`] so the core never writes to the console itself.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::dispatch::{validate_post_results, PostResult, ValidationRecord};
use crate::errors::Failure;
use crate::options::CommandOptions;
use crate::process::{build_post_command, PostCommand, PostRunner};
use crate::setup::{resolve_suite, ResolvedSetup, Setup, TestSuite, TestSuiteCollection};
use crate::storage::prepare_storage;
use crate::validators::ValidatorRegistry;

/// Post label used for entries that do not belong to a concrete post.
pub const NO_POST: &str = "(none)";

// =============================================================================
// SUMMARY TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    Passed,
    Failed,
    /// The post ran but no validator matched any of its artifacts.
    NoCoverage,
}

/// Outcome of one (test, post) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEntry {
    pub test: String,
    pub post: String,
    pub status: EntryStatus,
    pub last_failure: Option<String>,
    /// Validator invocations that passed.
    pub pass: usize,
    /// Validator invocations that failed.
    pub fail: usize,
    pub failures: Vec<String>,
}

impl SummaryEntry {
    /// An entry for a pair that failed before any validator ran.
    pub fn failed(test: &str, post: &str, failure: &Failure) -> Self {
        let message = failure.to_string();
        Self {
            test: test.to_string(),
            post: post.to_string(),
            status: EntryStatus::Failed,
            last_failure: Some(message.clone()),
            pass: 0,
            fail: 0,
            failures: vec![message],
        }
    }

    /// Folds a validated post into an entry.
    pub fn from_post_result(test: &str, post: &str, result: PostResult, strict: bool) -> Self {
        let mut status = if result.fail > 0 {
            EntryStatus::Failed
        } else if result.is_uncovered() {
            EntryStatus::NoCoverage
        } else {
            EntryStatus::Passed
        };
        let mut last_failure = result.last_failure;
        let mut failures = result.failures;
        if status == EntryStatus::NoCoverage && strict {
            let message = Failure::NoCoverage.to_string();
            status = EntryStatus::Failed;
            failures.push(message.clone());
            last_failure = Some(message);
        }
        Self {
            test: test.to_string(),
            post: post.to_string(),
            status,
            last_failure,
            pass: result.pass,
            fail: result.fail,
            failures,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == EntryStatus::Failed
    }
}

/// Aggregate outcome of a run. Totals count (test, post) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pass: usize,
    pub fail: usize,
    pub entries: Vec<SummaryEntry>,
}

impl RunSummary {
    pub fn push(&mut self, entry: SummaryEntry) {
        if entry.is_failure() {
            self.fail += 1;
        } else {
            self.pass += 1;
        }
        self.entries.push(entry);
    }

    pub fn extend(&mut self, other: RunSummary) {
        self.pass += other.pass;
        self.fail += other.fail;
        self.entries.extend(other.entries);
    }

    pub fn is_success(&self) -> bool {
        self.fail == 0
    }
}

// =============================================================================
// PROGRESS REPORTING
// =============================================================================

/// Receives progress events while the matrix runs.
pub trait ProgressSink {
    /// First selected post of a suite is about to run.
    fn test_started(&mut self, _suite: &TestSuite) {}
    fn post_started(&mut self, _post: &str) {}
    fn process_failed(&mut self, _command: &PostCommand) {}
    fn validation_recorded(&mut self, _record: &ValidationRecord) {}
    fn entry_recorded(&mut self, _entry: &SummaryEntry) {}
}

/// Discards every event.
pub struct NullProgress;
impl ProgressSink for NullProgress {}

// =============================================================================
// RUNNERS
// =============================================================================

/// Collaborators shared by every (test, post) pair of a run.
pub struct Harness<'a> {
    pub options: &'a CommandOptions,
    pub registry: &'a ValidatorRegistry,
    pub runner: &'a dyn PostRunner,
}

impl<'a> Harness<'a> {
    pub fn new(
        options: &'a CommandOptions,
        registry: &'a ValidatorRegistry,
        runner: &'a dyn PostRunner,
    ) -> Self {
        Self {
            options,
            registry,
            runner,
        }
    }

    /// Runs every suite selected by the test filter, in declaration order.
    pub fn run_tests(
        &self,
        collection: &TestSuiteCollection,
        sink: &mut dyn ProgressSink,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for suite in &collection.tests {
            if !self.options.selects_test(&suite.name) {
                tracing::debug!(test = %suite.name, "test not selected");
                continue;
            }
            summary.extend(self.run_test(suite, &collection.setups, sink));
        }
        tracing::info!(pass = summary.pass, fail = summary.fail, "run complete");
        summary
    }

    /// Resolves one suite's setup and runs each of its posts.
    pub fn run_test(
        &self,
        suite: &TestSuite,
        setups: &BTreeMap<String, Setup>,
        sink: &mut dyn ProgressSink,
    ) -> RunSummary {
        match resolve_suite(suite, setups) {
            Ok(setup) => self.run_resolved(suite, &setup, sink),
            Err(e) => {
                tracing::warn!(test = %suite.name, error = %e, "cannot resolve setup");
                let mut summary = RunSummary::default();
                let entry = SummaryEntry::failed(
                    &suite.name,
                    NO_POST,
                    &Failure::SetupResolution(e.to_string()),
                );
                sink.entry_recorded(&entry);
                summary.push(entry);
                summary
            }
        }
    }

    fn run_resolved(
        &self,
        suite: &TestSuite,
        setup: &ResolvedSetup,
        sink: &mut dyn ProgressSink,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let structural = setup
            .structural_error()
            .map(|problem| Failure::Configuration(problem.to_string()));

        if setup.posts.is_empty() {
            if let Some(failure) = &structural {
                let entry = SummaryEntry::failed(&setup.name, NO_POST, failure);
                sink.entry_recorded(&entry);
                summary.push(entry);
            }
            return summary;
        }

        let mut header_shown = false;
        for (post_index, post) in setup.posts.iter().enumerate() {
            // Structural problems are reported for every post, filtered or not.
            if let Some(failure) = &structural {
                let entry = SummaryEntry::failed(&setup.name, post, failure);
                sink.entry_recorded(&entry);
                summary.push(entry);
                continue;
            }
            if !self.options.selects_post(post) {
                tracing::debug!(test = %setup.name, post = %post, "post not selected");
                continue;
            }
            if !header_shown {
                sink.test_started(suite);
                header_shown = true;
            }
            sink.post_started(post);

            let entry = self.run_post(setup, post_index, sink);
            sink.entry_recorded(&entry);
            summary.push(entry);
        }
        summary
    }

    fn run_post(
        &self,
        setup: &ResolvedSetup,
        post_index: usize,
        sink: &mut dyn ProgressSink,
    ) -> SummaryEntry {
        let post = &setup.posts[post_index];
        let folders = match prepare_storage(setup, post_index, self.options) {
            Ok(folders) => folders,
            Err(failure) => return SummaryEntry::failed(&setup.name, post, &failure),
        };

        let command = build_post_command(setup, post_index, self.options, &folders.cnc_path);
        tracing::info!(test = %setup.name, post = %post, command = %command, "running post-processor");
        if !self.runner.run(&command) {
            sink.process_failed(&command);
            return SummaryEntry::failed(&setup.name, post, &Failure::ProcessFailure);
        }

        let result = validate_post_results(
            self.registry,
            setup,
            post_index,
            self.options,
            &folders.cnc_path,
            &folders.snapshot_path,
        );
        for record in &result.records {
            sink.validation_recorded(record);
        }
        SummaryEntry::from_post_result(&setup.name, post, result, self.options.strict_coverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SnapshotMode;
    use crate::setup::{ValidatorMap, ValidatorSpec};
    use serde_json::json;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const LBRN: &str = r#"<LightBurnProject><CutSetting type="Cut"><index Value="0"/></CutSetting></LightBurnProject>"#;
    const GCODE: &str = "; Generated now\nG0 X0 Y0\nG1 X10 Y0\n";

    /// Stands in for the post-processor: writes an artifact named after the
    /// post kind next to the requested output stem.
    struct FakePost {
        calls: RefCell<Vec<PostCommand>>,
        succeed: bool,
        lbrn: RefCell<String>,
    }

    impl FakePost {
        fn new(succeed: bool) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                succeed,
                lbrn: RefCell::new(LBRN.to_string()),
            }
        }
    }

    impl PostRunner for FakePost {
        fn run(&self, command: &PostCommand) -> bool {
            self.calls.borrow_mut().push(command.clone());
            if !self.succeed {
                return false;
            }
            let args = command.args();
            let script = args.iter().find(|a| a.ends_with(".cps")).unwrap();
            let stem = args.last().unwrap();
            if script.contains("lbrn") {
                fs::write(format!("{}.lbrn", stem), self.lbrn.borrow().as_str()).unwrap();
            } else {
                fs::write(format!("{}.gcode", stem), GCODE).unwrap();
            }
            true
        }
    }

    struct Workspace {
        _root: TempDir,
        options: CommandOptions,
    }

    impl Workspace {
        fn new(mode: SnapshotMode) -> Self {
            let root = tempfile::tempdir().unwrap();
            let cnc_root = root.path().join("cnc");
            fs::create_dir_all(&cnc_root).unwrap();
            fs::write(cnc_root.join("circles.cnc"), "cnc").unwrap();
            let options = CommandOptions {
                snapshot_mode: mode,
                cnc_root,
                post_root: root.path().join("src"),
                results_root: root.path().join("results"),
                snapshot_root: root.path().join("snapshots"),
                ..CommandOptions::default()
            };
            Self {
                _root: root,
                options,
            }
        }

        fn snapshot(&self, test: &str, post: &str, key: &str) -> PathBuf {
            self.options
                .snapshot_root
                .join(test)
                .join(post)
                .join(format!("{}.snapshot", key))
        }
    }

    fn validators() -> ValidatorMap {
        vec![
            (
                "layers",
                ValidatorSpec::new("*lbrn*", "*.lbrn", "xpath")
                    .with_param("queries", json!([{ "path": "//CutSetting" }])),
            ),
            (
                "gcode",
                ValidatorSpec::new("*gcode*", "*.gcode", "text")
                    .with_param("exclude", json!(["^; Generated"])),
            ),
        ]
        .into_iter()
        .collect()
    }

    fn collection() -> TestSuiteCollection {
        let mut setups = BTreeMap::new();
        setups.insert(
            "base".to_string(),
            Setup {
                cnc: Some("circles".to_string()),
                posts: Some(vec!["laserpost-lbrn".to_string(), "laserpost-gcode".to_string()]),
                validators: validators(),
                ..Setup::default()
            },
        );
        TestSuiteCollection {
            tests: vec![suite("Circles", Some("base"))],
            setups,
        }
    }

    fn suite(name: &str, setup: Option<&str>) -> TestSuite {
        TestSuite {
            name: name.to_string(),
            description: None,
            setup: setup.map(str::to_string),
            cnc: None,
            posts: None,
            validators: ValidatorMap::new(),
            properties: BTreeMap::new(),
        }
    }

    fn run(ws: &Workspace, post: &FakePost, collection: &TestSuiteCollection) -> RunSummary {
        let registry = ValidatorRegistry::with_defaults();
        Harness::new(&ws.options, &registry, post).run_tests(collection, &mut NullProgress)
    }

    #[test]
    fn each_post_is_validated_by_its_own_validator() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        let summary = run(&ws, &post, &collection());

        assert_eq!((summary.pass, summary.fail), (2, 0));
        assert_eq!(summary.entries.len(), 2);
        assert!(summary
            .entries
            .iter()
            .all(|e| e.status == EntryStatus::Passed && e.pass == 1));
        assert!(ws.snapshot("Circles", "laserpost-lbrn", "layers").exists());
        assert!(ws.snapshot("Circles", "laserpost-gcode", "gcode").exists());
        assert!(!ws.snapshot("Circles", "laserpost-lbrn", "gcode").exists());
        assert!(!ws.snapshot("Circles", "laserpost-gcode", "layers").exists());
    }

    #[test]
    fn rerun_against_baselines_detects_drift() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        run(&ws, &post, &collection());

        let mut options = ws.options.clone();
        options.snapshot_mode = SnapshotMode::NoWrite;
        *post.lbrn.borrow_mut() =
            r#"<LightBurnProject><CutSetting type="Scan"/></LightBurnProject>"#.to_string();
        let registry = ValidatorRegistry::with_defaults();
        let summary =
            Harness::new(&options, &registry, &post).run_tests(&collection(), &mut NullProgress);

        assert_eq!((summary.pass, summary.fail), (1, 1));
        assert_eq!(summary.entries[0].post, "laserpost-lbrn");
        assert_eq!(
            summary.entries[0].last_failure.as_deref(),
            Some("Snapshots do not match.")
        );
    }

    #[test]
    fn missing_baseline_fails_in_no_write_mode() {
        let ws = Workspace::new(SnapshotMode::NoWrite);
        let post = FakePost::new(true);
        let summary = run(&ws, &post, &collection());

        assert_eq!(summary.fail, 2);
        let results = ws.options.results_root.join("Circles").join("laserpost-lbrn");
        assert!(results.join("layers.snapshot").exists());
        assert!(!ws.snapshot("Circles", "laserpost-lbrn", "layers").exists());
    }

    #[test]
    fn empty_posts_never_invoke_the_post_processor() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        let mut c = collection();
        c.setups.get_mut("base").unwrap().posts = Some(Vec::new());
        let summary = run(&ws, &post, &c);

        assert!(post.calls.borrow().is_empty());
        assert_eq!(summary.fail, 1);
        assert_eq!(summary.entries[0].post, NO_POST);
        assert_eq!(
            summary.entries[0].last_failure.as_deref(),
            Some("Invalid setup: No posts defined.")
        );
    }

    #[test]
    fn missing_cnc_fails_every_post() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        let mut c = collection();
        c.setups.get_mut("base").unwrap().cnc = None;
        let summary = run(&ws, &post, &c);

        assert!(post.calls.borrow().is_empty());
        assert_eq!(summary.fail, 2);
        assert!(summary
            .entries
            .iter()
            .all(|e| e.last_failure.as_deref() == Some("Invalid setup: No CNC defined.")));
    }

    #[test]
    fn filters_select_tests_and_posts() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        let mut c = collection();
        c.tests.push(suite("Squares", Some("base")));

        let mut options = ws.options.clone();
        options.tests = vec!["CIRC".to_string()];
        options.post_filter = vec!["Gcode".to_string()];
        let registry = ValidatorRegistry::with_defaults();
        let summary = Harness::new(&options, &registry, &post).run_tests(&c, &mut NullProgress);

        assert_eq!(summary.entries.len(), 1);
        assert_eq!(summary.entries[0].test, "Circles");
        assert_eq!(summary.entries[0].post, "laserpost-gcode");
        assert_eq!(post.calls.borrow().len(), 1);
    }

    #[test]
    fn filtered_post_without_a_matching_validator_is_uncovered() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        let mut c = collection();
        let base = c.setups.get_mut("base").unwrap();
        base.posts = Some(vec!["lbrn".to_string(), "gcode".to_string()]);
        base.validators = vec![(
            "layers",
            ValidatorSpec::new("lbrn", "*.lbrn", "xpath")
                .with_param("queries", json!([{ "path": "//CutSetting" }])),
        )]
        .into_iter()
        .collect();

        let mut options = ws.options.clone();
        options.post_filter = vec!["gcode".to_string()];
        let registry = ValidatorRegistry::with_defaults();
        let summary = Harness::new(&options, &registry, &post).run_tests(&c, &mut NullProgress);

        assert_eq!(post.calls.borrow().len(), 1);
        assert_eq!(summary.entries.len(), 1);
        let entry = &summary.entries[0];
        assert_eq!(entry.post, "gcode");
        assert_eq!(entry.status, EntryStatus::NoCoverage);
        assert_eq!((entry.pass, entry.fail), (0, 0));
        assert_eq!((summary.pass, summary.fail), (1, 0));
        assert!(!ws.snapshot("Circles", "gcode", "layers").exists());
    }

    #[test]
    fn process_failure_skips_validation() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(false);
        let summary = run(&ws, &post, &collection());

        assert_eq!(summary.fail, 2);
        assert!(summary
            .entries
            .iter()
            .all(|e| e.last_failure.as_deref() == Some("Post-processor failed to execute.")));
        assert!(!ws.snapshot("Circles", "laserpost-lbrn", "layers").exists());
    }

    #[test]
    fn unresolvable_setup_is_recorded_and_run_continues() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        let mut c = collection();
        c.tests.insert(0, suite("Broken", Some("missing")));
        let summary = run(&ws, &post, &c);

        assert_eq!(summary.entries.len(), 3);
        assert_eq!(summary.entries[0].post, NO_POST);
        assert!(summary.entries[0]
            .last_failure
            .as_deref()
            .unwrap()
            .contains("missing"));
        assert_eq!(summary.pass, 2);
    }

    #[test]
    fn uncovered_post_passes_unless_strict() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        let mut c = collection();
        c.setups.get_mut("base").unwrap().validators = ValidatorMap::new();

        let summary = run(&ws, &post, &c);
        assert_eq!(summary.pass, 2);
        assert!(summary
            .entries
            .iter()
            .all(|e| e.status == EntryStatus::NoCoverage));

        let mut options = ws.options.clone();
        options.strict_coverage = true;
        let registry = ValidatorRegistry::with_defaults();
        let summary = Harness::new(&options, &registry, &post).run_tests(&c, &mut NullProgress);
        assert_eq!(summary.fail, 2);
        assert_eq!(
            summary.entries[0].last_failure.as_deref(),
            Some("No validators matched any artifact.")
        );
    }

    #[test]
    fn command_targets_the_prepared_folder() {
        let ws = Workspace::new(SnapshotMode::Create);
        let post = FakePost::new(true);
        run(&ws, &post, &collection());

        let calls = post.calls.borrow();
        let first = &calls[0];
        let cnc_dir = ws.options.results_root.join("Circles").join("laserpost-lbrn");
        assert_eq!(
            Path::new(first.args().last().unwrap()),
            cnc_dir.join("circles").as_path()
        );
        assert!(first.args().contains(&"--noeditor".to_string()));
    }
}
