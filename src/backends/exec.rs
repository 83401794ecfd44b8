//! Shared subprocess runner for the converter backends.
//!
//! Spawns the external tool with piped stdio, waits for completion and
//! returns the captured output. Success is decided by the caller through a
//! provider-specific predicate over (exit status, stdout, stderr) rather
//! than a global exit-code rule.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::trace;

use crate::error::BackendError;

/// Captured result of one external invocation.
#[derive(Debug)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Plain "exited zero" check.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Lossy stderr text for error reporting.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Lossy stdout text.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Turn this output into a `BackendError::Failed` for the given tool.
    pub fn into_failure(self, tool: &'static str) -> BackendError {
        BackendError::Failed {
            tool,
            code: self.code(),
            stderr: self.stderr_text(),
        }
    }
}

/// Run `program` with `args`, capturing stdout and stderr.
///
/// The child is killed if the future is dropped (e.g. on attempt timeout),
/// so an abandoned attempt cannot leak a running converter.
pub async fn run<I, S>(tool: &'static str, program: &str, args: I) -> Result<ExecOutput, BackendError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_inner(tool, program, args, None).await
}

/// Like [`run`], but with the child's working directory set to `cwd`.
pub async fn run_in<I, S>(
    tool: &'static str,
    program: &str,
    args: I,
    cwd: &std::path::Path,
) -> Result<ExecOutput, BackendError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_inner(tool, program, args, Some(cwd)).await
}

async fn run_inner<I, S>(
    tool: &'static str,
    program: &str,
    args: I,
    cwd: Option<&std::path::Path>,
) -> Result<ExecOutput, BackendError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.args(args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|source| BackendError::Spawn { tool, source })?;

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| BackendError::Spawn { tool, source })?;

    trace!(
        tool,
        code = ?output.status.code(),
        stdout_len = output.stdout.len(),
        stderr_len = output.stderr.len(),
        "External tool finished"
    );

    Ok(ExecOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = run("missing", "raview-no-such-binary", ["--version"])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Spawn { tool: "missing", .. }));
    }

    #[tokio::test]
    async fn test_capture_stdout() {
        let out = run("sh", "sh", ["-c", "printf hello"]).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_text(), "hello");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_failure_conversion() {
        let out = run("sh", "sh", ["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.code(), Some(3));
        let err = out.into_failure("sh");
        match err {
            BackendError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
