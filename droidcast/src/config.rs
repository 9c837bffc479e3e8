//! Configuration for the droidcast front end.

use std::path::Path;

use serde::{Deserialize, Serialize};

use droidcast_core::{BridgeConfig, RelayConfig, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Device-bridge tool settings.
    pub bridge: BridgeConfig,
    /// Capture-server and channel settings.
    pub session: SessionConfig,
    /// Viewer hand-off settings.
    pub relay: RelayConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive: "trace", "debug", "info", "warn",
    /// "error", or e.g. "droidcast_core=debug". `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Runs before logging is installed, so problems go to stderr.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = AppConfig::default().to_toml().unwrap();
        assert!(text.contains("[bridge]"));
        assert!(text.contains("[session]"));
        assert!(text.contains("queue_capacity"));
        assert!(text.contains("bit_rate"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [session]
            bit_rate = "8M"
            base_port = 7000

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session.bit_rate, "8M");
        assert_eq!(cfg.session.base_port, 7000);
        assert_eq!(cfg.session.socket_name, "scrcpy");
        assert_eq!(cfg.bridge.network_port, 5555);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn roundtrip_config() {
        let text = AppConfig::default().to_toml().unwrap();
        let parsed = AppConfig::parse(&text).unwrap();
        assert_eq!(parsed.session.base_port, 6666);
        assert_eq!(parsed.relay.queue_capacity, 256);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = AppConfig::load(Path::new("/nonexistent/droidcast.toml"));
        assert_eq!(cfg.logging.level, "info");
    }
}
