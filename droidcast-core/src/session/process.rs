//! Capture-server process: launcher worker and termination.
//!
//! The launcher worker owns the `adb shell` child for the session's whole
//! lifetime. It relays the server's stderr to the log until the stream
//! closes or the session is cancelled, then reaps the child and publishes
//! the exit on a watch channel. The session keeps only a [`RemoteProcess`]
//! handle (pid + exit watch) for termination.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MirrorError;

/// Termination handle for a launched capture server.
#[derive(Debug)]
pub(crate) struct RemoteProcess {
    pid: Option<u32>,
    exited: watch::Receiver<bool>,
}

impl RemoteProcess {
    pub(crate) fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Ask the process to exit, force-killing it after `grace`.
    ///
    /// Returns `ProcessTimeout` when the kill was needed.
    pub(crate) async fn terminate(&mut self, grace: Duration) -> Result<(), MirrorError> {
        if self.has_exited() {
            return Ok(());
        }
        if let Some(pid) = self.pid {
            send_signal(pid, false).await;
        }

        // A dropped sender means the launcher is gone and the child with it.
        if tokio::time::timeout(grace, self.exited.wait_for(|exited| *exited))
            .await
            .is_ok()
        {
            return Ok(());
        }

        warn!(pid = ?self.pid, "capture server ignored terminate; killing");
        if let Some(pid) = self.pid {
            send_signal(pid, true).await;
        }
        Err(MirrorError::ProcessTimeout(grace))
    }
}

/// Start the launcher worker for an already spawned child.
pub(crate) fn launch(
    child: Child,
    device: String,
    cancel: CancellationToken,
) -> (RemoteProcess, JoinHandle<()>) {
    let pid = child.id();
    let (exited_tx, exited) = watch::channel(false);
    let handle = tokio::spawn(run_launcher(child, device, cancel, exited_tx));
    (RemoteProcess { pid, exited }, handle)
}

async fn run_launcher(
    mut child: Child,
    device: String,
    cancel: CancellationToken,
    exited_tx: watch::Sender<bool>,
) {
    info!(device = %device, pid = ?child.id(), "capture server launched");

    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                l = lines.next_line() => l,
            };
            match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        info!(device = %device, "server: {line}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(device = %device, "server stderr read failed: {e}");
                    break;
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) => info!(device = %device, %status, "capture server exited"),
        Err(e) => warn!(device = %device, "waiting for capture server failed: {e}"),
    }
    let _ = exited_tx.send(true);
}

/// Signal a process by pid; failures are logged only.
async fn send_signal(pid: u32, force: bool) {
    #[cfg(not(target_os = "windows"))]
    let result = {
        let signal = if force { "-KILL" } else { "-TERM" };
        tokio::process::Command::new("kill")
            .arg(signal)
            .arg(pid.to_string())
            .output()
            .await
    };

    #[cfg(target_os = "windows")]
    let result = {
        let mut cmd = tokio::process::Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string()]);
        if force {
            cmd.arg("/F");
        }
        cmd.output().await
    };

    match result {
        Ok(out) if out.status.success() => debug!(pid, force, "signal delivered"),
        Ok(out) => debug!(
            pid,
            force,
            "signal not delivered: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ),
        Err(e) => debug!(pid, force, "could not run signal command: {e}"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn spawn_sh(script: &str) -> Child {
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn terminate_stops_a_cooperative_process() {
        let child = spawn_sh("echo booting >&2; exec sleep 30");
        let cancel = CancellationToken::new();
        let (mut process, launcher) = launch(child, "test".into(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        process.terminate(Duration::from_secs(3)).await.unwrap();
        assert!(process.has_exited());
        tokio::time::timeout(Duration::from_secs(3), launcher)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stubborn_process_is_force_killed() {
        let child = spawn_sh("trap '' TERM; while true; do sleep 1; done");
        let cancel = CancellationToken::new();
        let (mut process, launcher) = launch(child, "test".into(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let err = process
            .terminate(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ProcessTimeout(_)));
        tokio::time::timeout(Duration::from_secs(3), launcher)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn exit_is_published_when_process_ends_alone() {
        let child = spawn_sh("echo done >&2");
        let (mut process, launcher) = launch(child, "test".into(), CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(3), launcher)
            .await
            .unwrap()
            .unwrap();
        assert!(process.has_exited());
        process.terminate(Duration::from_millis(10)).await.unwrap();
    }
}
