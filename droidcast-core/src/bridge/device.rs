//! Device records and parsers for the bridge tool's text output.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SRC_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"src (\d+\.\d+\.\d+\.\d+)").expect("static pattern is valid")
});

// ── DeviceState ──────────────────────────────────────────────────

/// Connection state reported by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Attached and authorized; the only state a session can start from.
    Device,
    /// Attached but the host key has not been accepted on the device.
    Unauthorized,
    Offline,
    /// Any other token the tool prints (`recovery`, `sideload`, ...).
    Other(String),
}

impl DeviceState {
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "device" => Self::Device,
            "unauthorized" => Self::Unauthorized,
            "offline" => Self::Offline,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether a mirroring session can be started against this state.
    pub fn is_connectable(&self) -> bool {
        matches!(self, Self::Device)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Offline => write!(f, "offline"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

// ── Device ───────────────────────────────────────────────────────

/// One row of the device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// USB serial or `host:port`.
    pub id: String,
    pub state: DeviceState,
    /// `true` when attached over the network (`id` contains a port).
    pub is_network: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, state: DeviceState) -> Self {
        let id = id.into();
        let is_network = id.contains(':');
        Self {
            id,
            state,
            is_network,
        }
    }
}

// ── ForwardEntry ─────────────────────────────────────────────────

/// One row of `adb forward --list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardEntry {
    pub serial: String,
    /// Local side, e.g. `tcp:6666`.
    pub local: String,
    /// Device side, e.g. `localabstract:scrcpy`.
    pub remote: String,
}

impl ForwardEntry {
    /// The local TCP port, if the local side is a `tcp:` address.
    pub fn local_port(&self) -> Option<u16> {
        self.local.strip_prefix("tcp:")?.parse().ok()
    }
}

// ── Parsers ──────────────────────────────────────────────────────

/// Parse `adb devices` output.
///
/// The header line is skipped; each following non-blank line is
/// `<id>\t<state>[\t...]`. Lines with fewer than two fields are ignored.
pub fn parse_device_list(output: &str) -> Vec<Device> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim();
            let state = fields.next()?;
            if id.is_empty() {
                return None;
            }
            Some(Device::new(id, DeviceState::parse(state)))
        })
        .collect()
}

/// Extract the first `src <ipv4>` address from a routing-table dump.
pub fn parse_device_ip(route_dump: &str) -> Option<String> {
    SRC_IP
        .captures(route_dump)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse `adb forward --list` output.
pub fn parse_forward_list(output: &str) -> Vec<ForwardEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some(ForwardEntry {
                serial: fields.next()?.to_string(),
                local: fields.next()?.to_string(),
                remote: fields.next()?.to_string(),
            })
        })
        .collect()
}
