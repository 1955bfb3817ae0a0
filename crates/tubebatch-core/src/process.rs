//! Helpers for running external tools.

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Number of stderr lines kept in error messages.
const STDERR_TAIL_LINES: usize = 5;

/// Build a command that never inherits stdin and dies with its handle.
///
/// Dropping the future that awaits the child (for instance on timeout)
/// kills the process.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    // Keep console windows from popping up for every tool run.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

/// Run a command to completion and return its output if it succeeded.
pub async fn run_output(tool: &str, mut cmd: Command) -> Result<Output> {
    debug!("Running {}: {:?}", tool, cmd.as_std());
    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| spawn_error(tool, &e))?;

    if !output.status.success() {
        return Err(Error::tool(
            tool,
            format!(
                "exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            ),
        ));
    }
    Ok(output)
}

/// Map a spawn failure to a tool error with a useful message.
pub fn spawn_error(tool: &str, e: &std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::tool(tool, "executable not found"),
        _ => Error::tool(tool, format!("failed to start: {e}")),
    }
}

/// Last few non-empty lines of a tool's stderr.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "no error output".to_string()
    } else {
        tail
    }
}

/// Await `fut`, failing with [`Error::Timeout`] once `limit` elapses.
pub async fn with_timeout<T>(
    operation: impl Into<String>,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.into(),
            after: limit,
        }),
    }
}
