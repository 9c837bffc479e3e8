//! # droidcast-core
//!
//! Screen-mirroring engine for Android devices driven over `adb`.
//!
//! This crate contains:
//! - **Bridge**: `DeviceBridge`, a typed wrapper around the `adb` tool, over a
//!   swappable `CommandRunner`
//! - **Session**: `MirrorSession`, which pushes and launches the on-device
//!   capture server, forwards a local port, connects the video/audio/control
//!   channels and tears all of it down again
//! - **Relay**: `VideoRelay`, the bounded drop-newest hand-off to a viewer
//! - **Registry**: `SessionRegistry`, the device → session map
//! - **Config**: `serde`-backed settings with defaults for every knob
//! - **Error**: `MirrorError` / `BridgeError`, `thiserror`-based
//!
//! Media bytes are opaque: nothing here decodes or parses them.

pub mod bridge;
pub mod config;
pub mod error;
pub mod registry;
pub mod relay;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use bridge::{
    AdbRunner, CommandOutput, CommandRunner, ConnectionInfo, Device, DeviceBridge, DeviceState,
    ForwardEntry,
};
pub use config::{BridgeConfig, RelayConfig, SessionConfig};
pub use error::{BridgeError, MirrorError};
pub use registry::{DeviceSummary, SessionRegistry};
pub use relay::{RelayStats, VideoConsumer, VideoRelay};
pub use session::{
    ChannelKind, ChannelState, ControlSender, MirrorSession, PortAllocator, SessionPhase,
    StepOutcome, TeardownReport, TeardownStep, VideoCallback,
};
