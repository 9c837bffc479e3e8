//! Front-end operations over the core registry.
//!
//! Each CLI subcommand maps onto one method here. `mirror` runs until the
//! stop token fires, the device closes the video channel, or the sink
//! fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use droidcast_core::{
    ChannelKind, ChannelState, ConnectionInfo, DeviceBridge, DeviceSummary, MirrorError,
    RelayStats, SessionRegistry, VideoConsumer, VideoRelay,
};

use crate::config::AppConfig;

/// How often the mirror loop checks session health and logs throughput.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);
const STATS_EVERY: u32 = 5;

// ── Sink ─────────────────────────────────────────────────────────

/// Writes relayed video bytes to a file or stdout.
pub struct ByteSink {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ByteSink {
    pub async fn open(output: Option<&Path>) -> std::io::Result<Self> {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = match output {
            Some(path) => Box::new(tokio::fs::File::create(path).await?),
            None => Box::new(tokio::io::stdout()),
        };
        Ok(Self { writer })
    }
}

#[async_trait]
impl VideoConsumer for ByteSink {
    async fn deliver(&mut self, chunk: Bytes) -> std::io::Result<()> {
        self.writer.write_all(&chunk).await
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }
}

// ── MirrorService ────────────────────────────────────────────────

/// Why [`MirrorService::mirror`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorEnd {
    Stopped,
    RemoteClosed,
    ViewerGone,
}

pub struct MirrorService {
    config: AppConfig,
    registry: SessionRegistry,
}

impl MirrorService {
    pub fn new(config: AppConfig) -> Self {
        let bridge = Arc::new(DeviceBridge::with_adb(config.bridge.clone()));
        let registry = SessionRegistry::new(bridge, config.session.clone());
        Self { config, registry }
    }

    pub async fn devices(&self) -> Vec<DeviceSummary> {
        self.registry.refresh_devices().await;
        self.registry.list()
    }

    pub async fn connection_info(&self) -> ConnectionInfo {
        self.registry.bridge().connection_info().await
    }

    /// Switch the first USB device to network mode; returns its IP.
    pub async fn enable_network(&self) -> Result<String, MirrorError> {
        let ip = self.registry.bridge().enable_network_mode().await?;
        info!(ip = %ip, "network mode enabled");
        Ok(ip)
    }

    pub async fn connect(&self, ip: &str, port: Option<u16>) -> Result<String, MirrorError> {
        let port = port.unwrap_or(self.config.bridge.network_port);
        self.registry.connect_device(ip, port).await
    }

    /// Disconnect `host[:port]`, or every network device when `None`.
    pub async fn disconnect(&self, endpoint: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
        let bridge = self.registry.bridge();
        match endpoint {
            Some(endpoint) => {
                let (host, port) = match endpoint.rsplit_once(':') {
                    Some((host, port)) => {
                        let port: u16 = port
                            .parse()
                            .map_err(|_| format!("invalid endpoint: {endpoint}"))?;
                        (host, port)
                    }
                    None => (endpoint, self.config.bridge.network_port),
                };
                bridge.disconnect(Some((host, port))).await?;
            }
            None => bridge.disconnect(None).await?,
        }
        Ok(())
    }

    /// Mirror one device into `output` (stdout when `None`) until `stop`.
    ///
    /// With no `device`, the first connectable device is used.
    pub async fn mirror(
        &self,
        device: Option<&str>,
        output: Option<PathBuf>,
        stop: CancellationToken,
    ) -> Result<(MirrorEnd, RelayStats), Box<dyn std::error::Error>> {
        self.registry.refresh_devices().await;
        let id = match device {
            Some(id) => id.to_string(),
            None => self
                .registry
                .list()
                .into_iter()
                .find(|d| d.state.is_connectable())
                .map(|d| d.id)
                .ok_or_else(|| MirrorError::DeviceNotFound("no connectable device".into()))?,
        };

        let sink = ByteSink::open(output.as_deref()).await?;
        let relay = VideoRelay::spawn(&self.config.relay, sink);

        if let Err(e) = self.registry.start_exclusive(&id, relay.callback()).await {
            relay.close().await;
            return Err(e.into());
        }
        info!(device = %id, output = ?output, "mirroring; Ctrl-C to stop");

        let end = self.watch(&id, &relay, &stop).await;
        info!(device = %id, reason = ?end, "mirroring ending");

        for (device, report) in self.registry.stop_all().await {
            if !report.is_clean() {
                warn!(device = %device, "teardown: {report}");
            }
        }
        let stats = relay.close().await;
        Ok((end, stats))
    }

    async fn watch(&self, id: &str, relay: &VideoRelay, stop: &CancellationToken) -> MirrorEnd {
        let mut ticks = 0u32;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return MirrorEnd::Stopped,
                _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            }

            if !relay.is_open() {
                return MirrorEnd::ViewerGone;
            }
            match self.registry.channel_state(id, ChannelKind::Video).await {
                Some(ChannelState::Handshaking | ChannelState::Ready) => {}
                _ => return MirrorEnd::RemoteClosed,
            }

            ticks += 1;
            if ticks % STATS_EVERY == 0 {
                let stats = relay.stats();
                info!(
                    device = %id,
                    bytes = stats.delivered_bytes,
                    dropped = stats.dropped,
                    "relay throughput"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_writes_to_file() {
        let path = std::env::temp_dir().join(format!("droidcast-sink-{}.bin", std::process::id()));
        let mut sink = ByteSink::open(Some(&path)).await.unwrap();
        sink.deliver(Bytes::from_static(b"abc")).await.unwrap();
        sink.deliver(Bytes::from_static(b"def")).await.unwrap();
        sink.finish().await.unwrap();
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        let _ = std::fs::remove_file(&path);
    }
}
