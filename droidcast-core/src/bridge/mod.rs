//! Device bridge: a typed wrapper around the `adb` command-line tool.
//!
//! ```text
//!  SessionRegistry / MirrorSession
//!          │
//!          ▼
//!    DeviceBridge ── builds argument lists, parses output
//!          │
//!          ▼
//!    CommandRunner ── AdbRunner (real) / scripted runner (tests)
//! ```
//!
//! Every call is an external-process invocation with captured output. A
//! non-zero exit becomes a [`BridgeError::CommandFailed`] carrying stderr;
//! nothing here is fatal to the caller.

mod device;
mod runner;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

pub use device::{
    Device, DeviceState, ForwardEntry, parse_device_ip, parse_device_list, parse_forward_list,
};
pub use runner::{AdbRunner, CommandOutput, CommandRunner};

/// Snapshot of the bridge's network connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// `host:port` of the last successful `connect`, if any.
    pub active_endpoint: Option<String>,
    pub network_mode: bool,
    pub devices: Vec<Device>,
}

/// Typed access to the device-bridge tool.
pub struct DeviceBridge {
    runner: Arc<dyn CommandRunner>,
    config: BridgeConfig,
    /// Endpoint recorded by the last successful `connect`.
    active_endpoint: Mutex<Option<String>>,
}

impl DeviceBridge {
    pub fn new(runner: Arc<dyn CommandRunner>, config: BridgeConfig) -> Self {
        Self {
            runner,
            config,
            active_endpoint: Mutex::new(None),
        }
    }

    /// A bridge backed by the real `adb` executable from `config`.
    pub fn with_adb(config: BridgeConfig) -> Self {
        let runner = Arc::new(AdbRunner::new(config.adb_path.clone()));
        Self::new(runner, config)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ── Invocation helpers ───────────────────────────────────────

    fn device_args(device_id: Option<&str>, rest: &[&str]) -> Vec<String> {
        let mut args = Vec::with_capacity(rest.len() + 2);
        if let Some(id) = device_id {
            args.push("-s".to_string());
            args.push(id.to_string());
        }
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    /// Run and return stdout, or the failure carrying stderr.
    async fn exec(&self, device_id: Option<&str>, rest: &[&str]) -> Result<String, BridgeError> {
        let args = Self::device_args(device_id, rest);
        debug!(args = ?args, "adb");
        let output = self.runner.run(&args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(BridgeError::CommandFailed {
                code: output.code,
                stderr: output.stderr,
            })
        }
    }

    // ── Discovery ────────────────────────────────────────────────

    /// List attached devices. Returns an empty list if the tool fails.
    pub async fn list_devices(&self) -> Vec<Device> {
        match self.exec(None, &["devices"]).await {
            Ok(out) => parse_device_list(&out),
            Err(e) => {
                warn!("device listing failed: {e}");
                Vec::new()
            }
        }
    }

    /// The device's IPv4 address from its routing table, if any.
    pub async fn device_ip(&self, device_id: &str) -> Option<String> {
        match self.exec(Some(device_id), &["shell", "ip", "route"]).await {
            Ok(out) => parse_device_ip(&out),
            Err(e) => {
                warn!(device = %device_id, "route dump failed: {e}");
                None
            }
        }
    }

    // ── Network mode ─────────────────────────────────────────────

    /// Connect to `ip:port` over the network.
    ///
    /// Succeeds iff the tool's output mentions "connected" (which also
    /// covers "already connected"), case-insensitively. Returns the raw
    /// output on success.
    pub async fn connect(&self, ip: &str, port: u16) -> Result<String, BridgeError> {
        let address = format!("{ip}:{port}");
        let output = self.exec(None, &["connect", &address]).await?;
        let lower = output.to_lowercase();
        if lower.contains("connected") || lower.contains("already connected") {
            info!(endpoint = %address, "connected");
            *self.lock_endpoint() = Some(address);
            Ok(output)
        } else {
            Err(BridgeError::ConnectRejected(output))
        }
    }

    /// Disconnect one endpoint, or every network endpoint when `None`.
    ///
    /// The active endpoint is cleared only when the tool succeeds.
    pub async fn disconnect(&self, endpoint: Option<(&str, u16)>) -> Result<(), BridgeError> {
        match endpoint {
            Some((ip, port)) => {
                let address = format!("{ip}:{port}");
                self.exec(None, &["disconnect", &address]).await?;
            }
            None => {
                self.exec(None, &["disconnect"]).await?;
            }
        }
        *self.lock_endpoint() = None;
        Ok(())
    }

    /// Switch the first USB device to network mode and connect to it.
    ///
    /// Fails without issuing `tcpip` when no USB device is attached or its
    /// IP cannot be determined. Returns the device IP on success.
    pub async fn enable_network_mode(&self) -> Result<String, BridgeError> {
        let devices = self.list_devices().await;
        let usb = devices
            .iter()
            .find(|d| !d.is_network)
            .ok_or(BridgeError::NoUsbDevice)?;

        let ip = self
            .device_ip(&usb.id)
            .await
            .ok_or(BridgeError::IpNotFound)?;

        let port = self.config.network_port.to_string();
        self.exec(Some(&usb.id), &["tcpip", &port]).await?;

        // The daemon restarts after `tcpip`; nothing confirms when it is back.
        tokio::time::sleep(self.config.restart_delay()).await;

        self.connect(&ip, self.config.network_port).await?;
        Ok(ip)
    }

    /// Currently recorded endpoint and device listing.
    pub async fn connection_info(&self) -> ConnectionInfo {
        let active_endpoint = self.active_endpoint();
        ConnectionInfo {
            network_mode: active_endpoint.is_some(),
            active_endpoint,
            devices: self.list_devices().await,
        }
    }

    pub fn active_endpoint(&self) -> Option<String> {
        self.lock_endpoint().clone()
    }

    fn lock_endpoint(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.active_endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    // ── Session plumbing ─────────────────────────────────────────

    /// Push a host file to the device.
    pub async fn push(&self, device_id: &str, local: &str, remote: &str) -> Result<(), BridgeError> {
        self.exec(Some(device_id), &["push", local, remote]).await?;
        Ok(())
    }

    /// Forward `tcp:<port>` on the host to `localabstract:<socket>`.
    pub async fn forward(&self, device_id: &str, port: u16, socket: &str) -> Result<(), BridgeError> {
        let local = format!("tcp:{port}");
        let remote = format!("localabstract:{socket}");
        self.exec(Some(device_id), &["forward", &local, &remote])
            .await?;
        Ok(())
    }

    /// Remove the forward on `tcp:<port>`.
    pub async fn remove_forward(&self, device_id: &str, port: u16) -> Result<(), BridgeError> {
        let local = format!("tcp:{port}");
        self.exec(Some(device_id), &["forward", "--remove", &local])
            .await?;
        Ok(())
    }

    /// All forwards known to the bridge daemon.
    pub async fn list_forwards(&self) -> Result<Vec<ForwardEntry>, BridgeError> {
        let out = self.exec(None, &["forward", "--list"]).await?;
        Ok(parse_forward_list(&out))
    }

    /// Spawn `adb -s <device> shell <command>` with stderr piped.
    pub fn spawn_shell(&self, device_id: &str, command: &str) -> Result<Child, BridgeError> {
        let args = Self::device_args(Some(device_id), &["shell", command]);
        debug!(args = ?args, "adb spawn");
        Ok(self.runner.spawn(&args)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Answers invocations from a table keyed by the joined argument list.
    #[derive(Default)]
    struct ScriptedRunner {
        responses: HashMap<String, CommandOutput>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn respond(mut self, args: &str, output: CommandOutput) -> Self {
            self.responses.insert(args.to_string(), output);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, args: &[String]) -> std::io::Result<CommandOutput> {
            let key = args.join(" ");
            self.calls.lock().unwrap().push(key.clone());
            Ok(self
                .responses
                .get(&key)
                .cloned()
                .unwrap_or_else(|| CommandOutput::failed(1, format!("unscripted: {key}"))))
        }

        fn spawn(&self, _args: &[String]) -> std::io::Result<Child> {
            Err(std::io::Error::other("spawn not scripted"))
        }
    }

    fn bridge(runner: ScriptedRunner) -> (DeviceBridge, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let config = BridgeConfig {
            restart_delay_ms: 0,
            ..Default::default()
        };
        (DeviceBridge::new(runner.clone(), config), runner)
    }

    #[tokio::test]
    async fn list_devices_empty_on_failure() {
        let (bridge, _) = bridge(ScriptedRunner::default());
        assert!(bridge.list_devices().await.is_empty());
    }

    #[tokio::test]
    async fn connect_accepts_connected_and_already_connected() {
        let runner = ScriptedRunner::default()
            .respond("connect 10.0.0.5:5555", CommandOutput::ok("connected to 10.0.0.5:5555\n"))
            .respond(
                "connect 10.0.0.6:5555",
                CommandOutput::ok("ALREADY CONNECTED to 10.0.0.6:5555\n"),
            );
        let (bridge, _) = bridge(runner);

        bridge.connect("10.0.0.5", 5555).await.unwrap();
        assert_eq!(bridge.active_endpoint().as_deref(), Some("10.0.0.5:5555"));

        bridge.connect("10.0.0.6", 5555).await.unwrap();
        assert_eq!(bridge.active_endpoint().as_deref(), Some("10.0.0.6:5555"));
    }

    #[tokio::test]
    async fn connect_failure_carries_output_verbatim() {
        let text = "failed to connect to '10.0.0.7:5555': Connection refused\n";
        let runner =
            ScriptedRunner::default().respond("connect 10.0.0.7:5555", CommandOutput::ok(text));
        let (bridge, _) = bridge(runner);

        match bridge.connect("10.0.0.7", 5555).await {
            Err(BridgeError::ConnectRejected(out)) => assert_eq!(out, text),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(bridge.active_endpoint().is_none());
    }

    #[tokio::test]
    async fn disconnect_clears_endpoint_only_on_success() {
        let runner = ScriptedRunner::default()
            .respond("connect 10.0.0.5:5555", CommandOutput::ok("connected"))
            .respond("disconnect 10.0.0.5:5555", CommandOutput::failed(1, "no such device"));
        let (bridge, _) = bridge(runner);
        bridge.connect("10.0.0.5", 5555).await.unwrap();

        assert!(bridge.disconnect(Some(("10.0.0.5", 5555))).await.is_err());
        assert!(bridge.active_endpoint().is_some());
    }

    #[tokio::test]
    async fn disconnect_all() {
        let runner = ScriptedRunner::default()
            .respond("connect 10.0.0.5:5555", CommandOutput::ok("connected"))
            .respond("disconnect", CommandOutput::ok("disconnected everything"));
        let (bridge, _) = bridge(runner);
        bridge.connect("10.0.0.5", 5555).await.unwrap();
        bridge.disconnect(None).await.unwrap();
        assert!(bridge.active_endpoint().is_none());
        assert!(!bridge.connection_info().await.network_mode);
    }

    #[tokio::test]
    async fn network_mode_without_usb_device_has_no_side_effects() {
        let runner = ScriptedRunner::default().respond(
            "devices",
            CommandOutput::ok("List of devices attached\n10.0.0.5:5555\tdevice\n"),
        );
        let (bridge, runner) = bridge(runner);

        let err = bridge.enable_network_mode().await.unwrap_err();
        assert!(matches!(err, BridgeError::NoUsbDevice));
        assert!(runner.calls().iter().all(|c| !c.contains("tcpip")));
    }

    #[tokio::test]
    async fn network_mode_without_ip_has_no_side_effects() {
        let runner = ScriptedRunner::default()
            .respond("devices", CommandOutput::ok("List of devices attached\nABC\tdevice\n"))
            .respond("-s ABC shell ip route", CommandOutput::ok("default dev rmnet0\n"));
        let (bridge, runner) = bridge(runner);

        let err = bridge.enable_network_mode().await.unwrap_err();
        assert!(matches!(err, BridgeError::IpNotFound));
        assert!(runner.calls().iter().all(|c| !c.contains("tcpip")));
    }

    #[tokio::test]
    async fn network_mode_happy_path() {
        let runner = ScriptedRunner::default()
            .respond("devices", CommandOutput::ok("List of devices attached\nABC\tdevice\n"))
            .respond(
                "-s ABC shell ip route",
                CommandOutput::ok("192.168.1.0/24 dev wlan0 src 192.168.1.42\n"),
            )
            .respond("-s ABC tcpip 5555", CommandOutput::ok("restarting in TCP mode port: 5555"))
            .respond("connect 192.168.1.42:5555", CommandOutput::ok("connected to 192.168.1.42:5555"));
        let (bridge, runner) = bridge(runner);

        let ip = tokio::time::timeout(Duration::from_secs(5), bridge.enable_network_mode())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(ip, "192.168.1.42");
        assert_eq!(
            runner.calls(),
            vec![
                "devices",
                "-s ABC shell ip route",
                "-s ABC tcpip 5555",
                "connect 192.168.1.42:5555"
            ]
        );
    }

    #[tokio::test]
    async fn push_failure_carries_stderr() {
        let runner = ScriptedRunner::default().respond(
            "-s ABC push scrcpy-server /data/local/tmp/scrcpy-server.jar",
            CommandOutput::failed(1, "adb: error: cannot stat 'scrcpy-server'"),
        );
        let (bridge, _) = bridge(runner);
        let err = bridge
            .push("ABC", "scrcpy-server", "/data/local/tmp/scrcpy-server.jar")
            .await
            .unwrap_err();
        assert!(err.diagnostic().contains("cannot stat"));
    }
}
