//! Device → session map.
//!
//! The registry composes [`DeviceBridge`] and [`MirrorSession`] for callers.
//! It tracks every known device and at most one session per device id.
//!
//! # Locking
//!
//! The map sits behind a short-lived std mutex that is never held across an
//! `.await`. Each running session lives behind its own async mutex, held for
//! the whole of a stop, so sessions of different devices never contend.
//! Control sends take that mutex only long enough to clone a
//! [`ControlSender`](crate::session::ControlSender). A device being started is marked `Starting` in the map; its
//! session is recorded only once the start protocol has succeeded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::bridge::{Device, DeviceBridge, DeviceState};
use crate::config::SessionConfig;
use crate::error::MirrorError;
use crate::session::{ChannelKind, ChannelState, MirrorSession, TeardownReport, VideoCallback};

type SharedSession = Arc<AsyncMutex<MirrorSession>>;

/// One row of [`SessionRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    pub state: DeviceState,
    pub is_mirroring: bool,
}

enum Slot {
    Idle,
    Starting,
    Mirroring(SharedSession),
}

struct Entry {
    device: Device,
    slot: Slot,
}

pub struct SessionRegistry {
    bridge: Arc<DeviceBridge>,
    config: SessionConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new(bridge: Arc<DeviceBridge>, config: SessionConfig) -> Self {
        Self {
            bridge,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn bridge(&self) -> &Arc<DeviceBridge> {
        &self.bridge
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Devices ──────────────────────────────────────────────────

    /// Register a device. Returns `false` if the id is already present.
    pub fn add_device(&self, id: impl Into<String>, state: DeviceState) -> bool {
        let id = id.into();
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return false;
        }
        info!(device = %id, %state, "device added");
        entries.insert(
            id.clone(),
            Entry {
                device: Device::new(id, state),
                slot: Slot::Idle,
            },
        );
        true
    }

    /// Sync with the bridge listing: add new devices and update the state
    /// of known ones. Returns the number added.
    pub async fn refresh_devices(&self) -> usize {
        let listed = self.bridge.list_devices().await;
        let mut entries = self.entries();
        let mut added = 0;
        for device in listed {
            match entries.get_mut(&device.id) {
                Some(entry) => entry.device.state = device.state,
                None => {
                    info!(device = %device.id, state = %device.state, "device discovered");
                    entries.insert(
                        device.id.clone(),
                        Entry {
                            device,
                            slot: Slot::Idle,
                        },
                    );
                    added += 1;
                }
            }
        }
        added
    }

    /// Every registered device, sorted by id.
    pub fn list(&self) -> Vec<DeviceSummary> {
        let entries = self.entries();
        let mut rows: Vec<DeviceSummary> = entries
            .values()
            .map(|e| DeviceSummary {
                id: e.device.id.clone(),
                state: e.device.state.clone(),
                is_mirroring: matches!(e.slot, Slot::Mirroring(_)),
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn is_mirroring(&self, id: &str) -> bool {
        self.entries()
            .get(id)
            .is_some_and(|e| matches!(e.slot, Slot::Mirroring(_)))
    }

    /// Remove a device, stopping its session first.
    ///
    /// Returns `false` if the device was not registered.
    pub async fn remove_device(&self, id: &str) -> bool {
        let Some(entry) = self.entries().remove(id) else {
            return false;
        };
        if let Slot::Mirroring(session) = entry.slot {
            stop_session(id, &session).await;
        }
        info!(device = %id, "device removed");
        true
    }

    /// Connect to a network device and register it as `ip:port`.
    pub async fn connect_device(&self, ip: &str, port: u16) -> Result<String, MirrorError> {
        let id = format!("{ip}:{port}");
        if self.contains(&id) {
            return Err(MirrorError::DuplicateDevice(id));
        }
        self.bridge.connect(ip, port).await?;
        // A concurrent refresh may have registered it meanwhile; that is fine.
        self.add_device(id.clone(), DeviceState::Device);
        Ok(id)
    }

    /// Remove a device; network devices are also disconnected on the bridge.
    pub async fn disconnect_device(&self, id: &str) -> Result<(), MirrorError> {
        if !self.remove_device(id).await {
            return Err(MirrorError::UnknownDevice(id.to_string()));
        }
        if let Some((host, port)) = split_endpoint(id) {
            self.bridge.disconnect(Some((host, port))).await?;
        }
        Ok(())
    }

    // ── Mirroring ────────────────────────────────────────────────

    /// Start mirroring `id`, delivering video bytes to `on_video`.
    pub async fn start_mirror(&self, id: &str, on_video: VideoCallback) -> Result<(), MirrorError> {
        {
            let mut entries = self.entries();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| MirrorError::UnknownDevice(id.to_string()))?;
            if !matches!(entry.slot, Slot::Idle) {
                return Err(MirrorError::AlreadyMirroring(id.to_string()));
            }
            entry.slot = Slot::Starting;
        }

        let mut session = MirrorSession::new(id, self.bridge.clone(), self.config.clone());
        let result = session.start(on_video).await;

        let mut orphan = {
            let mut entries = self.entries();
            match (entries.get_mut(id), result) {
                (Some(entry), Ok(())) => {
                    entry.slot = Slot::Mirroring(Arc::new(AsyncMutex::new(session)));
                    return Ok(());
                }
                (Some(entry), Err(e)) => {
                    entry.slot = Slot::Idle;
                    return Err(e);
                }
                (None, Err(e)) => return Err(e),
                (None, Ok(())) => session,
            }
        };

        // Removed while starting: nothing may keep running for it.
        warn!(device = %id, "device removed during start; stopping session");
        orphan.stop().await;
        Err(MirrorError::UnknownDevice(id.to_string()))
    }

    /// Stop every other session, then start `id`.
    pub async fn start_exclusive(
        &self,
        id: &str,
        on_video: VideoCallback,
    ) -> Result<(), MirrorError> {
        let others: Vec<String> = self
            .entries()
            .iter()
            .filter(|(other, e)| other.as_str() != id && matches!(e.slot, Slot::Mirroring(_)))
            .map(|(other, _)| other.clone())
            .collect();
        for other in others {
            self.stop_mirror(&other).await;
        }
        self.start_mirror(id, on_video).await
    }

    /// Stop mirroring `id`. The record is cleared whatever the teardown
    /// outcome; `None` means nothing was mirroring.
    pub async fn stop_mirror(&self, id: &str) -> Option<TeardownReport> {
        let session = {
            let mut entries = self.entries();
            let entry = entries.get_mut(id)?;
            match std::mem::replace(&mut entry.slot, Slot::Idle) {
                Slot::Mirroring(session) => session,
                other => {
                    entry.slot = other;
                    return None;
                }
            }
        };
        Some(stop_session(id, &session).await)
    }

    /// Stop every session; used when the viewer goes away.
    pub async fn stop_all(&self) -> Vec<(String, TeardownReport)> {
        let sessions: Vec<(String, SharedSession)> = {
            let mut entries = self.entries();
            entries
                .iter_mut()
                .filter_map(|(id, entry)| match std::mem::replace(&mut entry.slot, Slot::Idle) {
                    Slot::Mirroring(session) => Some((id.clone(), session)),
                    other => {
                        entry.slot = other;
                        None
                    }
                })
                .collect()
        };

        let mut reports = Vec::with_capacity(sessions.len());
        for (id, session) in sessions {
            let report = stop_session(&id, &session).await;
            reports.push((id, report));
        }
        reports
    }

    /// Write to the control channel of `id`'s session.
    pub async fn send_control(&self, id: &str, data: &[u8]) -> Result<(), MirrorError> {
        let session = {
            let entries = self.entries();
            let entry = entries
                .get(id)
                .ok_or_else(|| MirrorError::UnknownDevice(id.to_string()))?;
            match &entry.slot {
                Slot::Mirroring(session) => session.clone(),
                _ => return Err(MirrorError::NotMirroring(id.to_string())),
            }
        };
        // Released before writing so stop never queues behind a send.
        let sender = session.lock().await.control_sender()?;
        sender.send(data).await
    }

    /// State of one channel of `id`'s session; `None` when not mirroring.
    pub async fn channel_state(&self, id: &str, kind: ChannelKind) -> Option<ChannelState> {
        let session = match &self.entries().get(id)?.slot {
            Slot::Mirroring(session) => session.clone(),
            _ => return None,
        };
        let state = session.lock().await.channel_state(kind);
        Some(state)
    }

    /// Remove every device, then disconnect all network endpoints.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.entries().keys().cloned().collect();
        for id in &ids {
            self.remove_device(id).await;
        }
        if let Err(e) = self.bridge.disconnect(None).await {
            warn!("disconnecting network devices failed: {}", e.diagnostic());
        }
        info!(devices = ids.len(), "registry shut down");
    }
}

async fn stop_session(id: &str, session: &SharedSession) -> TeardownReport {
    let report = session.lock().await.stop().await;
    info!(device = %id, clean = report.is_clean(), "mirroring stopped");
    report
}

/// `host:port` → parts, for network device ids.
fn split_endpoint(id: &str) -> Option<(&str, u16)> {
    let (host, port) = id.rsplit_once(':')?;
    Some((host, port.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CommandOutput, CommandRunner};
    use crate::config::BridgeConfig;
    use async_trait::async_trait;
    use std::io;

    /// Lists one device and accepts connect/disconnect; nothing else works.
    struct ListingRunner;

    #[async_trait]
    impl CommandRunner for ListingRunner {
        async fn run(&self, args: &[String]) -> io::Result<CommandOutput> {
            let out = match args.first().map(String::as_str) {
                Some("devices") => CommandOutput::ok("List of devices attached\nUSB1\tdevice\nUSB2\tunauthorized\n"),
                Some("connect") => CommandOutput::ok(&format!("connected to {}\n", args[1])),
                Some("disconnect") => CommandOutput::ok("disconnected\n"),
                _ => CommandOutput::failed(1, "unsupported"),
            };
            Ok(out)
        }

        fn spawn(&self, _args: &[String]) -> io::Result<tokio::process::Child> {
            Err(io::Error::other("spawn unsupported"))
        }
    }

    fn registry() -> SessionRegistry {
        let bridge = DeviceBridge::new(Arc::new(ListingRunner), BridgeConfig::default());
        SessionRegistry::new(Arc::new(bridge), SessionConfig::default())
    }

    fn noop() -> VideoCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn split_endpoint_parses_network_ids() {
        assert_eq!(split_endpoint("10.0.0.2:5555"), Some(("10.0.0.2", 5555)));
        assert_eq!(split_endpoint("ABC123"), None);
        assert_eq!(split_endpoint("host:notaport"), None);
    }

    #[tokio::test]
    async fn refresh_adds_listed_devices_once() {
        let reg = registry();
        assert_eq!(reg.refresh_devices().await, 2);
        assert_eq!(reg.refresh_devices().await, 0);

        let rows = reg.list();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "USB1");
        assert_eq!(rows[1].state, DeviceState::Unauthorized);
        assert!(rows.iter().all(|r| !r.is_mirroring));
    }

    #[tokio::test]
    async fn add_device_rejects_duplicates() {
        let reg = registry();
        assert!(reg.add_device("X", DeviceState::Device));
        assert!(!reg.add_device("X", DeviceState::Offline));
        assert!(reg.remove_device("X").await);
        assert!(!reg.remove_device("X").await);
    }

    #[tokio::test]
    async fn start_unknown_device_is_rejected() {
        let reg = registry();
        let err = reg.start_mirror("ghost", noop()).await.unwrap_err();
        assert!(matches!(err, MirrorError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn failed_start_leaves_device_idle() {
        let reg = registry();
        reg.add_device("GONE", DeviceState::Device);
        // Not in the bridge listing.
        let err = reg.start_mirror("GONE", noop()).await.unwrap_err();
        assert!(matches!(err, MirrorError::DeviceNotFound(_)));
        assert!(!reg.is_mirroring("GONE"));

        // The slot is free again, so a retry gets the same answer.
        let err = reg.start_mirror("GONE", noop()).await.unwrap_err();
        assert!(matches!(err, MirrorError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn control_and_stop_need_a_session() {
        let reg = registry();
        reg.add_device("USB1", DeviceState::Device);
        assert!(matches!(
            reg.send_control("USB1", b"x").await,
            Err(MirrorError::NotMirroring(_))
        ));
        assert!(matches!(
            reg.send_control("nope", b"x").await,
            Err(MirrorError::UnknownDevice(_))
        ));
        assert!(reg.stop_mirror("USB1").await.is_none());
        assert!(reg.stop_all().await.is_empty());
    }

    #[tokio::test]
    async fn connect_device_registers_endpoint() {
        let reg = registry();
        let id = reg.connect_device("192.168.1.42", 5555).await.unwrap();
        assert_eq!(id, "192.168.1.42:5555");
        assert!(reg.contains(&id));
        assert!(matches!(
            reg.connect_device("192.168.1.42", 5555).await,
            Err(MirrorError::DuplicateDevice(_))
        ));

        reg.disconnect_device(&id).await.unwrap();
        assert!(!reg.contains(&id));
        assert!(reg.bridge().active_endpoint().is_none());
    }
}
