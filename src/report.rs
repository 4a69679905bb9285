//! Handles all user-facing output of a run.
//!
//! [`ConsoleReporter`] receives progress events from the runners and prints
//! them as they happen; [`ConsoleReporter::print_summary`] prints the final
//! per-pair table. Output goes through `termcolor` so colors can be switched off
//! for pipes and captured in tests.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::dispatch::ValidationRecord;
use crate::errors::{HarnessError, Result};
use crate::process::PostCommand;
use crate::runner::{EntryStatus, ProgressSink, RunSummary, SummaryEntry};
use crate::setup::TestSuite;
use crate::snapshot::SnapshotVerdict;

/// Colors are used only when stdout is a terminal.
pub fn color_choice() -> ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn fg(color: Color) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color));
    spec
}

fn dimmed() -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_dimmed(true);
    spec
}

// ============================================================================
// CONSOLE REPORTER
// ============================================================================

pub struct ConsoleReporter<W: WriteColor> {
    out: W,
    verbose: bool,
    write_errors: usize,
}

impl ConsoleReporter<StandardStream> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(StandardStream::stdout(color_choice()), verbose)
    }
}

impl<W: WriteColor> ConsoleReporter<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            write_errors: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Number of console writes that failed so far.
    pub fn write_errors(&self) -> usize {
        self.write_errors
    }

    /// Progress hooks cannot fail the run, so a broken console is logged and counted.
    fn emit(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            self.write_errors += 1;
            tracing::warn!(error = %e, "console write failed");
        }
    }

    fn line(&mut self, spec: &ColorSpec, text: &str) -> io::Result<()> {
        self.out.set_color(spec)?;
        write!(self.out, "{}", text)?;
        self.out.reset()?;
        writeln!(self.out)
    }

    fn diff(&mut self, diff: &str) -> io::Result<()> {
        for line in diff.lines() {
            let spec = match line.chars().next() {
                Some('+') => fg(Color::Green),
                Some('-') => fg(Color::Red),
                _ => ColorSpec::new(),
            };
            self.line(&spec, &format!("      {}", line))?;
        }
        Ok(())
    }

    fn record(&mut self, record: &ValidationRecord) -> io::Result<()> {
        let key = record.key.as_str();
        match &record.verdict {
            Ok(SnapshotVerdict::Matched) if self.verbose => {
                self.line(&fg(Color::Green), &format!("      {}: Snapshots match", key))
            }
            Ok(SnapshotVerdict::Matched) => Ok(()),
            Ok(SnapshotVerdict::Created) => self.line(
                &fg(Color::Yellow),
                &format!(
                    "      {}: Baseline snapshot does not exist; saving snapshot.",
                    key
                ),
            ),
            Ok(SnapshotVerdict::Reset) => self.line(
                &fg(Color::Yellow),
                &format!("      {}: Resetting snapshot to latest.", key),
            ),
            Ok(SnapshotVerdict::Mismatch { diff }) => {
                self.line(
                    &fg(Color::Red),
                    &format!("      FAIL {}: Snapshots do not match", key),
                )?;
                self.diff(diff)
            }
            Ok(SnapshotVerdict::Missing) => self.line(
                &fg(Color::Red),
                &format!(
                    "      FAIL {}: Snapshot does not exist, but snapshot mode disallows creation (requires \"--snapshot create\")",
                    key
                ),
            ),
            Err(failure) => {
                let target = match &record.file {
                    Some(file) => format!("{} [{}]", key, file),
                    None => key.to_string(),
                };
                self.line(&fg(Color::Red), &format!("    FAIL {}: {}", target, failure))
            }
        }
    }

    fn summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        writeln!(self.out)?;
        for entry in &summary.entries {
            let (label, color) = match entry.status {
                EntryStatus::Passed => ("PASS", Color::Green),
                EntryStatus::NoCoverage => ("NONE", Color::Yellow),
                EntryStatus::Failed => ("FAIL", Color::Red),
            };
            self.out.set_color(&fg(color))?;
            write!(self.out, "{}", label)?;
            self.out.reset()?;
            match &entry.last_failure {
                Some(message) => writeln!(
                    self.out,
                    ": {} [{}] ({})",
                    entry.test, entry.post, message
                )?,
                None => writeln!(self.out, ": {} [{}]", entry.test, entry.post)?,
            }
        }

        write!(self.out, "\nTest summary: total {}, ", summary.entries.len())?;
        self.out.set_color(&fg(Color::Green))?;
        write!(self.out, "passed")?;
        self.out.reset()?;
        write!(self.out, " {}, ", summary.pass)?;
        self.out.set_color(&fg(Color::Red))?;
        write!(self.out, "failed")?;
        self.out.reset()?;
        writeln!(self.out, " {}", summary.fail)
    }

    /// Prints one line per (test, post) pair followed by the totals.
    pub fn print_summary(&mut self, summary: &RunSummary) {
        let result = self.summary(summary);
        self.emit(result);
    }
}

impl<W: WriteColor> ProgressSink for ConsoleReporter<W> {
    fn test_started(&mut self, suite: &TestSuite) {
        let header = match &suite.setup {
            Some(setup) => format!("Test: \"{}\" (setup \"{}\"):", suite.name, setup),
            None => format!("Test: \"{}\":", suite.name),
        };
        let result = self.line(&fg(Color::Blue), &header);
        self.emit(result);
    }

    fn post_started(&mut self, post: &str) {
        let result = self.line(&dimmed(), &format!("  Post: {}", post));
        self.emit(result);
    }

    fn process_failed(&mut self, command: &PostCommand) {
        let result = self.line(&fg(Color::Red), "    FAIL: Post-processor failed to execute.");
        self.emit(result);
        if self.verbose {
            let result = self.line(&dimmed(), &format!("    Command: {}", command));
            self.emit(result);
        }
    }

    fn validation_recorded(&mut self, record: &ValidationRecord) {
        let result = self.record(record);
        self.emit(result);
    }

    fn entry_recorded(&mut self, entry: &SummaryEntry) {
        if entry.status == EntryStatus::NoCoverage {
            let result = self.line(
                &fg(Color::Yellow),
                "    No validators matched any artifact.",
            );
            self.emit(result);
        }
    }
}

// ============================================================================
// MACHINE-READABLE REPORT
// ============================================================================

/// Writes the run summary, every failure included, as pretty JSON.
pub fn write_json(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
    }
    fs::write(path, json).map_err(|e| HarnessError::io(path, e))
}
