//! Mirroring session engine.
//!
//! A [`MirrorSession`] owns everything one device's mirror needs: the
//! forwarded local port, the capture-server process, the three channels and
//! their workers.
//!
//! ```text
//!  host                                         device
//!  ┌───────────────────────────────┐            ┌─────────────────────┐
//!  │ MirrorSession                 │   adb      │ scrcpy-server       │
//!  │  launcher ── adb shell ───────┼───────────►│  (app_process)      │
//!  │  video   ◄─┐                  │            │                     │
//!  │  audio   ◄─┼─ 127.0.0.1:port ─┼─ forward ─►│ localabstract:scrcpy│
//!  │  control ◄─┘                  │            │                     │
//!  └───────────────────────────────┘            └─────────────────────┘
//! ```
//!
//! # Serialization
//!
//! `start` and `stop` take `&mut self`; callers sharing a session must hold
//! one lock across each whole sequence (the registry keeps every session
//! behind its own async mutex). Control sends go through a
//! [`ControlSender`], which needs no session lock.

mod channel;
mod control;
mod phase;
mod port;
mod process;
mod teardown;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::DeviceBridge;
use crate::config::SessionConfig;
use crate::error::MirrorError;

pub use channel::{ChannelKind, ChannelState, VideoCallback};
pub use control::ControlSender;
pub use phase::SessionPhase;
pub use port::PortAllocator;
pub use teardown::{StepOutcome, TeardownReport, TeardownStep};

use channel::{ChannelStatus, ChunkHandler, Receiver};
use control::SharedWriter;
use process::RemoteProcess;

/// Write side of a connected channel, kept for shutdown and control sends.
struct OpenChannel {
    kind: ChannelKind,
    writer: SharedWriter,
    status: ChannelStatus,
}

struct Worker {
    kind: ChannelKind,
    handle: JoinHandle<()>,
}

/// One device's mirroring session.
pub struct MirrorSession {
    device_id: String,
    bridge: Arc<DeviceBridge>,
    config: SessionConfig,
    phase: SessionPhase,
    /// Local port of the live forward.
    port: Option<u16>,
    /// Stop flag shared with every worker. Replaced on each start.
    cancel: CancellationToken,
    channels: Vec<OpenChannel>,
    receivers: Vec<Worker>,
    launcher: Option<JoinHandle<()>>,
    process: Option<RemoteProcess>,
}

impl MirrorSession {
    pub fn new(device_id: impl Into<String>, bridge: Arc<DeviceBridge>, config: SessionConfig) -> Self {
        Self {
            device_id: device_id.into(),
            bridge,
            config,
            phase: SessionPhase::Idle,
            port: None,
            cancel: CancellationToken::new(),
            channels: Vec::new(),
            receivers: Vec::new(),
            launcher: None,
            process: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    /// Local port of the active forward.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// State of one channel; `Closed` when it is not open.
    pub fn channel_state(&self, kind: ChannelKind) -> ChannelState {
        self.channels
            .iter()
            .find(|c| c.kind == kind)
            .map_or(ChannelState::Closed, |c| c.status.get())
    }

    // ── Start ────────────────────────────────────────────────────

    /// Run the start protocol.
    ///
    /// Returns once all three channels are connected and their workers
    /// spawned. On failure everything acquired so far has been released;
    /// there is no need to call [`stop`](Self::stop).
    pub async fn start(&mut self, on_video: VideoCallback) -> Result<(), MirrorError> {
        self.phase.begin_start()?;
        info!(device = %self.device_id, bit_rate = %self.config.bit_rate, "starting mirror session");
        self.cancel = CancellationToken::new();

        // Nothing outlives a failed preparation: no process exists yet and
        // the forward is recorded only once created.
        if let Err(e) = self.prepare().await {
            warn!(device = %self.device_id, "start failed: {e}");
            self.phase.abort_start()?;
            return Err(e);
        }

        if let Err(e) = self.launch_and_connect(on_video).await {
            warn!(device = %self.device_id, "start failed: {e}; tearing down");
            self.stop().await;
            return Err(e);
        }

        self.phase.complete_start()?;
        info!(device = %self.device_id, port = ?self.port, "mirror session running");
        Ok(())
    }

    /// Device check, payload push, port allocation, forward.
    async fn prepare(&mut self) -> Result<(), MirrorError> {
        let present = self
            .bridge
            .list_devices()
            .await
            .iter()
            .any(|d| d.id == self.device_id && d.state.is_connectable());
        if !present {
            return Err(MirrorError::DeviceNotFound(self.device_id.clone()));
        }

        let local = self.config.server_local_path.to_string_lossy();
        self.bridge
            .push(&self.device_id, &local, &self.config.server_device_path)
            .await
            .map_err(|e| MirrorError::PushFailed(e.diagnostic()))?;

        let port =
            PortAllocator::new(self.config.base_port, self.config.max_port_attempts).allocate()?;

        self.remove_stale_forward().await;
        self.bridge
            .forward(&self.device_id, port, &self.config.socket_name)
            .await
            .map_err(|e| MirrorError::ForwardFailed(e.diagnostic()))?;
        self.port = Some(port);
        debug!(device = %self.device_id, port, socket = %self.config.socket_name, "forward created");
        Ok(())
    }

    async fn remove_stale_forward(&mut self) {
        if let Some(old) = self.port.take() {
            if let Err(e) = self.bridge.remove_forward(&self.device_id, old).await {
                debug!(device = %self.device_id, port = old, "stale forward removal: {e}");
            }
        }
    }

    /// Launcher, channel connects, receive workers.
    async fn launch_and_connect(&mut self, on_video: VideoCallback) -> Result<(), MirrorError> {
        let port = self
            .port
            .ok_or(MirrorError::InvalidPhase("no forward to connect through"))?;

        let child = self
            .bridge
            .spawn_shell(&self.device_id, &self.config.server_invocation())
            .map_err(|e| MirrorError::LaunchFailed(e.diagnostic()))?;
        let (process, launcher) = process::launch(child, self.device_id.clone(), self.cancel.clone());
        self.process = Some(process);
        self.launcher = Some(launcher);

        // The server binds its socket asynchronously; there is no readiness signal.
        tokio::time::sleep(self.config.server_boot_delay()).await;

        let mut readers: Vec<(ChannelKind, OwnedReadHalf, ChannelStatus)> = Vec::with_capacity(3);
        for kind in ChannelKind::ALL {
            let stream = channel::connect(port, kind, self.config.connect_timeout()).await?;
            info!(device = %self.device_id, channel = %kind, "channel connected");
            let (reader, writer) = stream.into_split();
            let status = ChannelStatus::new();
            self.channels.push(OpenChannel {
                kind,
                writer: Arc::new(AsyncMutex::new(writer)),
                status: status.clone(),
            });
            readers.push((kind, reader, status));
        }

        for (kind, reader, status) in readers {
            let handler = match kind {
                ChannelKind::Video => ChunkHandler::Forward(on_video.clone()),
                ChannelKind::Audio => ChunkHandler::Discard,
                ChannelKind::Control => ChunkHandler::Log,
            };
            let receiver = Receiver {
                device: self.device_id.clone(),
                kind,
                reader,
                chunk_size: kind.chunk_size(&self.config),
                handler,
                cancel: self.cancel.clone(),
                status,
            };
            self.receivers.push(Worker {
                kind,
                handle: tokio::spawn(receiver.run()),
            });
        }
        Ok(())
    }

    // ── Control ──────────────────────────────────────────────────

    /// Handle for writing to the control channel of a running session.
    pub fn control_sender(&self) -> Result<ControlSender, MirrorError> {
        if !self.phase.is_running() {
            return Err(MirrorError::ControlSendFailed(format!(
                "session is {}",
                self.phase
            )));
        }
        let channel = self
            .channels
            .iter()
            .find(|c| c.kind == ChannelKind::Control)
            .ok_or_else(|| MirrorError::ControlSendFailed("control channel not connected".into()))?;
        Ok(ControlSender::new(
            self.device_id.clone(),
            channel.writer.clone(),
            self.cancel.clone(),
            self.config.control_send_timeout(),
        ))
    }

    /// Write `data` to the control channel.
    ///
    /// Reset, broken-pipe, not-connected and timeout conditions come back as
    /// `ControlSendFailed`; the session itself is unaffected.
    pub async fn send_control(&self, data: &[u8]) -> Result<(), MirrorError> {
        self.control_sender()?.send(data).await
    }

    // ── Stop ─────────────────────────────────────────────────────

    /// Run the stop protocol. Never fails; calling it on an idle session
    /// returns an empty report.
    pub async fn stop(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.phase.begin_stop().is_err() {
            debug!(device = %self.device_id, phase = %self.phase, "stop: nothing to do");
            return report;
        }
        info!(device = %self.device_id, "stopping mirror session");

        self.cancel.cancel();
        report.record(TeardownStep::Cancel, StepOutcome::Done);

        self.close_channels(&mut report).await;

        let join_timeout = self.config.join_timeout();
        for worker in std::mem::take(&mut self.receivers) {
            let outcome = join_bounded(worker.handle, join_timeout, &self.device_id, worker.kind).await;
            report.record(TeardownStep::JoinReceiver(worker.kind), outcome);
        }

        let outcome = match self.process.take() {
            None => StepOutcome::Skipped,
            Some(mut process) => match process.terminate(self.config.terminate_grace()).await {
                Ok(()) => StepOutcome::Done,
                Err(e) => {
                    warn!(device = %self.device_id, "{e}");
                    StepOutcome::TimedOut
                }
            },
        };
        report.record(TeardownStep::TerminateServer, outcome);

        let outcome = match self.launcher.take() {
            None => StepOutcome::Skipped,
            Some(handle) => join_launcher(handle, join_timeout, &self.device_id).await,
        };
        report.record(TeardownStep::JoinLauncher, outcome);

        let outcome = match self.port.take() {
            None => StepOutcome::Skipped,
            Some(port) => match self.bridge.remove_forward(&self.device_id, port).await {
                Ok(()) => StepOutcome::Done,
                Err(e) => StepOutcome::Failed(e.diagnostic()),
            },
        };
        report.record(TeardownStep::RemoveForward, outcome);

        // begin_stop succeeded above, so this transition is valid.
        let _ = self.phase.finish_stop();

        if report.is_clean() {
            info!(device = %self.device_id, "mirror session stopped");
        } else {
            warn!(device = %self.device_id, "mirror session stopped with errors: {report}");
        }
        debug!(device = %self.device_id, "teardown: {report}");
        report
    }

    /// Shut down and drop every channel's write side.
    ///
    /// Runs after the stop token fired, so pending control sends have
    /// released the writer.
    async fn close_channels(&mut self, report: &mut TeardownReport) {
        for channel in std::mem::take(&mut self.channels) {
            channel.status.advance(ChannelState::Closing);
            let outcome = match channel.writer.lock().await.shutdown().await {
                Ok(()) => StepOutcome::Done,
                Err(e) => StepOutcome::Ignored(e.to_string()),
            };
            report.record(TeardownStep::CloseChannel(channel.kind), outcome);
        }
    }
}

impl Drop for MirrorSession {
    fn drop(&mut self) {
        if self.phase.is_idle() {
            return;
        }
        // Best effort only: the forward cannot be removed without awaiting.
        warn!(device = %self.device_id, port = ?self.port, "session dropped while {}; aborting workers", self.phase);
        self.cancel.cancel();
        for worker in self.receivers.drain(..) {
            worker.handle.abort();
        }
        if let Some(launcher) = self.launcher.take() {
            // Aborting drops the child, which kills it.
            launcher.abort();
        }
    }
}

async fn join_bounded(
    mut handle: JoinHandle<()>,
    limit: Duration,
    device: &str,
    kind: ChannelKind,
) -> StepOutcome {
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(())) => StepOutcome::Done,
        Ok(Err(e)) => StepOutcome::Failed(format!("worker panicked: {e}")),
        Err(_) => {
            warn!(device = %device, channel = %kind, "receiver did not stop within {limit:?}");
            handle.abort();
            StepOutcome::TimedOut
        }
    }
}

async fn join_launcher(mut handle: JoinHandle<()>, limit: Duration, device: &str) -> StepOutcome {
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(())) => StepOutcome::Done,
        Ok(Err(e)) => StepOutcome::Failed(format!("launcher panicked: {e}")),
        Err(_) => {
            warn!(device = %device, "launcher did not stop within {limit:?}");
            handle.abort();
            StepOutcome::TimedOut
        }
    }
}
