//! Process-level seam under [`DeviceBridge`](super::DeviceBridge).
//!
//! A [`CommandRunner`] executes one bridge invocation (everything after the
//! executable name). [`AdbRunner`] is the production implementation; tests
//! substitute a scripted runner.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

/// Captured result of a finished bridge invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A zero-exit output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output carrying `stderr`.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs bridge invocations.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr.
    async fn run(&self, args: &[String]) -> std::io::Result<CommandOutput>;

    /// Spawn a long-lived invocation with stderr piped, stdin and stdout
    /// discarded. The child must be killed when its handle is dropped.
    fn spawn(&self, args: &[String]) -> std::io::Result<Child>;
}

// ── AdbRunner ────────────────────────────────────────────────────

/// Invokes the real `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbRunner {
    path: PathBuf,
}

impl AdbRunner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CommandRunner for AdbRunner {
    async fn run(&self, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, args: &[String]) -> std::io::Result<Child> {
        Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_success_requires_zero_exit() {
        assert!(CommandOutput::ok("").success());
        assert!(!CommandOutput::failed(1, "boom").success());
        let signalled = CommandOutput {
            code: None,
            ..Default::default()
        };
        assert!(!signalled.success());
    }

    #[tokio::test]
    async fn missing_executable_is_io_error() {
        let runner = AdbRunner::new("/nonexistent/droidcast-test-adb");
        let err = runner.run(&["devices".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
