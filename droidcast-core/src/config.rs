//! Tunables for the bridge, the session engine and the video relay.
//!
//! Every option has a default; TOML front ends embed these structs
//! directly with `#[serde(default)]`, so a partial file only overrides
//! what it names. Durations are expressed in milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default local port the allocator starts probing from.
///
/// Kept clear of 5555, the bridge daemon's own network port.
pub const DEFAULT_BASE_PORT: u16 = 6666;

/// Default number of ports probed before giving up.
pub const DEFAULT_MAX_PORT_ATTEMPTS: u16 = 100;

/// Default network port for `tcpip` / `connect`.
pub const DEFAULT_NETWORK_PORT: u16 = 5555;

// ── BridgeConfig ─────────────────────────────────────────────────

/// Settings for the device-bridge tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path to the `adb` executable (looked up on `PATH` when bare).
    pub adb_path: PathBuf,
    /// Port used when switching a USB device to network mode.
    pub network_port: u16,
    /// Pause after `tcpip` before attempting to connect.
    pub restart_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            network_port: DEFAULT_NETWORK_PORT,
            restart_delay_ms: 1000,
        }
    }
}

impl BridgeConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// Settings for one [`MirrorSession`](crate::session::MirrorSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Video bit rate, passed verbatim into the server invocation.
    pub bit_rate: String,
    /// Host-side path of the capture-server payload.
    pub server_local_path: PathBuf,
    /// Device-side path the payload is pushed to.
    pub server_device_path: String,
    /// Entry class of the capture server.
    pub server_class: String,
    /// Protocol version argument expected by the capture server.
    pub server_version: String,
    /// Abstract socket name the capture server listens on.
    pub socket_name: String,
    /// First local port probed for the forward.
    pub base_port: u16,
    /// Number of consecutive ports probed.
    pub max_port_attempts: u16,
    /// Read chunk size for the video channel.
    pub video_chunk_size: usize,
    /// Read chunk size for the audio channel.
    pub audio_chunk_size: usize,
    /// Read chunk size for the control channel.
    pub control_chunk_size: usize,
    /// Delay between launching the server and connecting channels.
    pub server_boot_delay_ms: u64,
    /// Upper bound on each channel's TCP connect.
    pub connect_timeout_ms: u64,
    /// Upper bound on one control send; a peer that stops reading cannot
    /// stall the caller past it.
    pub control_send_timeout_ms: u64,
    /// Bounded wait when joining a worker during stop.
    pub join_timeout_ms: u64,
    /// Grace period between terminate and force-kill.
    pub terminate_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bit_rate: "1024000".into(),
            server_local_path: PathBuf::from("scrcpy-server"),
            server_device_path: "/data/local/tmp/scrcpy-server.jar".into(),
            server_class: "com.genymobile.scrcpy.Server".into(),
            server_version: "3.1".into(),
            socket_name: "scrcpy".into(),
            base_port: DEFAULT_BASE_PORT,
            max_port_attempts: DEFAULT_MAX_PORT_ATTEMPTS,
            video_chunk_size: 20 * 1024,
            audio_chunk_size: 1024,
            control_chunk_size: 1024,
            server_boot_delay_ms: 1000,
            connect_timeout_ms: 5000,
            control_send_timeout_ms: 2000,
            join_timeout_ms: 3000,
            terminate_grace_ms: 3000,
        }
    }
}

impl SessionConfig {
    /// The shell command that starts the capture server on the device.
    pub fn server_invocation(&self) -> String {
        format!(
            "CLASSPATH={} app_process / {} {} tunnel_forward=true log_level=VERBOSE video_bit_rate={}",
            self.server_device_path, self.server_class, self.server_version, self.bit_rate
        )
    }

    pub fn server_boot_delay(&self) -> Duration {
        Duration::from_millis(self.server_boot_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn control_send_timeout(&self) -> Duration {
        Duration::from_millis(self.control_send_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

// ── RelayConfig ──────────────────────────────────────────────────

/// Settings for the video hand-off queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum number of queued video chunks. When full, new chunks are
    /// dropped.
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

// ── Tests ────────────────────────────────────────────────────────
