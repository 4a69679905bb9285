//! Post-processor invocation.
//!
//! Builds the command line for the external post-processor and runs it to
//! completion with an explicit timeout. A run that exits non-zero, cannot be
//! spawned, or exceeds the timeout is a failed run; partial output is never
//! trusted.
//!
//! On unix the post runs in its own process group and the whole group is killed
//! on timeout, so shell wrappers cannot leave a hung subcommand behind.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;

use crate::options::CommandOptions;
use crate::setup::ResolvedSetup;
use crate::storage::cnc_file_name;

/// A fully built post-processor command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCommand {
    /// Command to execute (first element is the executable).
    pub command: Vec<String>,
}

impl PostCommand {
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or(&[])
    }
}

impl std::fmt::Display for PostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command.join(" "))
    }
}

fn property_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds the post-processor command for `setup.posts[post_index]`.
///
/// `cnc_path` is the prepared results folder; the fixture inside it is the input
/// and the output is written next to it, named after the fixture (the post
/// script supplies the extension).
pub fn build_post_command(
    setup: &ResolvedSetup,
    post_index: usize,
    options: &CommandOptions,
    cnc_path: &Path,
) -> PostCommand {
    let post = &setup.posts[post_index];
    let post_file = if post.ends_with(".cps") {
        options.post_root.join(post)
    } else {
        options.post_root.join(format!("{}.cps", post))
    };
    let cnc_name = cnc_file_name(setup.cnc.as_deref().unwrap_or_default());
    let cnc_file = cnc_path.join(&cnc_name);
    let output_stem = Path::new(&cnc_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let mut command = vec![
        options.post_executable.display().to_string(),
        "--noeditor".to_string(),
        "--shorterror".to_string(),
    ];
    for (key, value) in &setup.properties {
        command.push("--property".to_string());
        command.push(key.clone());
        command.push(property_value(value));
    }
    command.push(post_file.display().to_string());
    command.push(cnc_file.display().to_string());
    command.push(cnc_path.join(output_stem).display().to_string());

    PostCommand { command }
}

/// Runs a post-processor command, reporting only whether it succeeded.
pub trait PostRunner {
    fn run(&self, command: &PostCommand) -> bool;
}

/// Runs the post-processor as a child process with a timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn execute(&self, program: &str, command: &PostCommand) -> bool {
        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program, error = %e, "failed to spawn post-processor");
                return false;
            }
        };
        let pid = child.id();

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(program, error = %e, "failed to wait for post-processor");
                return false;
            }
            Err(_) => {
                // The wait future owned the child; dropping it killed the leader.
                kill_process_group(pid).await;
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    "post-processor timed out"
                );
                return false;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            tracing::debug!(stdout = %stdout.trim(), stderr = %stderr.trim(), "post-processor succeeded");
            true
        } else {
            tracing::warn!(
                exit_code = output.status.code().unwrap_or(-1),
                stderr = %stderr.trim(),
                stdout = %stdout.trim(),
                "post-processor failed"
            );
            false
        }
    }
}

/// Kills every process left in the post's process group.
#[cfg(unix)]
async fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let killed = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = killed {
        tracing::warn!(pid, error = %e, "failed to kill post-processor process group");
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: Option<u32>) {}

impl PostRunner for ProcessRunner {
    fn run(&self, command: &PostCommand) -> bool {
        let Some(program) = command.program() else {
            tracing::warn!("post-processor command is empty");
            return false;
        };
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start process runtime");
                return false;
            }
        };
        runtime.block_on(self.execute(program, command))
    }
}
