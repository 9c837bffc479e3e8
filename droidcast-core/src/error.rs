//! Domain-specific error types for droidcast.
//!
//! Fallible session operations return `Result<T, MirrorError>`; bridge
//! invocations return `Result<T, BridgeError>`. Nothing here panics on bad
//! tool output. Every variant carries a human-readable reason derived from
//! the underlying tool's diagnostics where one exists.

use std::time::Duration;
use thiserror::Error;

use crate::session::ChannelKind;

/// The canonical error type for the mirroring session engine.
#[derive(Debug, Error)]
pub enum MirrorError {
    // ── Start protocol ───────────────────────────────────────────
    /// The device is absent from the bridge listing or not in `device` state.
    #[error("device not found or not authorized: {0}")]
    DeviceNotFound(String),

    /// Pushing the capture-server payload failed.
    #[error("failed to push capture server: {0}")]
    PushFailed(String),

    /// No bindable local port was found within the probe budget.
    #[error("no free local port in {base}..{base}+{attempts}")]
    PortExhausted { base: u16, attempts: u16 },

    /// Creating the port forward failed.
    #[error("failed to create port forward: {0}")]
    ForwardFailed(String),

    /// The remote capture-server process could not be spawned.
    #[error("failed to launch capture server: {0}")]
    LaunchFailed(String),

    /// A channel's TCP connect failed or timed out.
    #[error("{channel} channel connect failed: {source}")]
    ChannelConnectFailed {
        channel: ChannelKind,
        #[source]
        source: std::io::Error,
    },

    // ── Running session ──────────────────────────────────────────
    /// A channel failed mid-stream.
    #[error("{channel} channel lost: {source}")]
    ConnectionLost {
        channel: ChannelKind,
        #[source]
        source: std::io::Error,
    },

    /// The capture server ignored graceful termination and was killed.
    #[error("capture server did not exit within {0:?}; force-killed")]
    ProcessTimeout(Duration),

    /// Writing to the control channel failed.
    #[error("control send failed: {0}")]
    ControlSendFailed(String),

    /// The requested operation is not valid in the session's current phase.
    #[error("invalid session phase: {0}")]
    InvalidPhase(&'static str),

    // ── Registry ─────────────────────────────────────────────────
    /// The registry has no entry for this device.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// A device with this id is already registered.
    #[error("device already registered: {0}")]
    DuplicateDevice(String),

    /// The device already has a session starting or running.
    #[error("device is already mirroring: {0}")]
    AlreadyMirroring(String),

    /// The device has no running session.
    #[error("device is not mirroring: {0}")]
    NotMirroring(String),

    /// A bridge call outside the start protocol failed.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

// ── BridgeError ───────────────────────────────────────────────────

/// Failure of a single device-bridge invocation.
///
/// None of these are fatal to the caller: they are reported, logged, and the
/// caller decides what to do.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge executable could not be run at all.
    #[error("could not run bridge tool: {0}")]
    Io(#[from] std::io::Error),

    /// The tool exited with a non-zero status.
    #[error("bridge command failed ({}): {stderr}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    CommandFailed { code: Option<i32>, stderr: String },

    /// `connect` ran but the tool did not report a connection.
    #[error("connection rejected: {0}")]
    ConnectRejected(String),

    /// Network mode needs a USB device and none is attached.
    #[error("no USB-connected device found")]
    NoUsbDevice,

    /// The device's IP address could not be determined.
    #[error("could not determine device IP address")]
    IpNotFound,
}

impl BridgeError {
    /// The tool's diagnostic text, if this error carries one.
    pub fn diagnostic(&self) -> String {
        match self {
            BridgeError::CommandFailed { stderr, .. } => stderr.trim().to_string(),
            BridgeError::ConnectRejected(output) => output.trim().to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = MirrorError::PortExhausted {
            base: 6666,
            attempts: 100,
        };
        assert!(e.to_string().contains("6666"));
        assert!(e.to_string().contains("100"));

        let e = MirrorError::ChannelConnectFailed {
            channel: ChannelKind::Audio,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(e.to_string().starts_with("audio channel"));
    }

    #[test]
    fn command_failed_shows_exit_code() {
        let e = BridgeError::CommandFailed {
            code: Some(1),
            stderr: "error: device offline".into(),
        };
        assert!(e.to_string().contains("(1)"));
        assert_eq!(e.diagnostic(), "error: device offline");

        let e = BridgeError::CommandFailed {
            code: None,
            stderr: String::new(),
        };
        assert!(e.to_string().contains("signal"));
    }

    #[test]
    fn from_bridge() {
        let e: MirrorError = BridgeError::NoUsbDevice.into();
        assert!(matches!(e, MirrorError::Bridge(BridgeError::NoUsbDevice)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "adb missing");
        let e: BridgeError = io_err.into();
        assert!(matches!(e, BridgeError::Io(_)));
    }
}
