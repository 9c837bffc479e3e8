//! The three capture-server channels and their receive workers.
//!
//! All three are plain TCP connections to the same forwarded port; the
//! capture server tells them apart by accept order, so they must be opened
//! video → audio → control.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::MirrorError;

/// Receives every non-empty video chunk, in order.
pub type VideoCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

// ── ChannelKind ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Video,
    Audio,
    Control,
}

impl ChannelKind {
    /// Connect order expected by the capture server.
    pub const ALL: [ChannelKind; 3] = [Self::Video, Self::Audio, Self::Control];

    pub fn chunk_size(self, config: &SessionConfig) -> usize {
        match self {
            Self::Video => config.video_chunk_size,
            Self::Audio => config.audio_chunk_size,
            Self::Control => config.control_chunk_size,
        }
        .max(1)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Control => write!(f, "control"),
        }
    }
}

// ── ChannelState ─────────────────────────────────────────────────

/// Per-channel lifecycle, observable while the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Connected; waiting for the capture server's first byte.
    Handshaking,
    /// Handshake byte received; data is flowing.
    Ready,
    /// Stop requested; the socket is being shut down.
    Closing,
    Closed,
}

impl ChannelState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Handshaking,
            1 => Self::Ready,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Handshaking => 0,
            Self::Ready => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }
}

/// State cell shared by a channel's owner and its receive worker.
#[derive(Debug, Clone)]
pub(crate) struct ChannelStatus(Arc<AtomicU8>);

impl ChannelStatus {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ChannelState::Handshaking.as_u8())))
    }

    pub(crate) fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move forward only; a worker finishing late never reopens a
    /// closing channel, and closing never reopens a closed one.
    pub(crate) fn advance(&self, state: ChannelState) {
        self.0.fetch_max(state.as_u8(), Ordering::SeqCst);
    }
}

// ── Connect ──────────────────────────────────────────────────────

/// Open one channel to the forwarded loopback port.
pub(crate) async fn connect(
    port: u16,
    kind: ChannelKind,
    limit: Duration,
) -> Result<TcpStream, MirrorError> {
    let attempt = async {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
        stream.set_nodelay(true)?;
        Ok::<_, std::io::Error>(stream)
    };

    match tokio::time::timeout(limit, attempt).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(MirrorError::ChannelConnectFailed {
            channel: kind,
            source,
        }),
        Err(_) => Err(MirrorError::ChannelConnectFailed {
            channel: kind,
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no connection within {limit:?}"),
            ),
        }),
    }
}

// ── Receive worker ───────────────────────────────────────────────

/// What a receiver does with each chunk.
pub(crate) enum ChunkHandler {
    /// Hand to the session's video callback.
    Forward(VideoCallback),
    /// Drain and drop.
    Discard,
    /// Log at debug level.
    Log,
}

pub(crate) struct Receiver {
    pub(crate) device: String,
    pub(crate) kind: ChannelKind,
    pub(crate) reader: OwnedReadHalf,
    pub(crate) chunk_size: usize,
    pub(crate) handler: ChunkHandler,
    pub(crate) cancel: CancellationToken,
    pub(crate) status: ChannelStatus,
}

impl Receiver {
    /// Handshake, then read until EOF, error, or cancellation.
    pub(crate) async fn run(mut self) {
        if self.handshake().await {
            self.status.advance(ChannelState::Ready);
            debug!(device = %self.device, channel = %self.kind, "channel ready");
            self.receive().await;
        }
        self.status.advance(ChannelState::Closed);
        info!(device = %self.device, channel = %self.kind, "reception stopped");
    }

    /// The capture server sends one byte before streaming.
    async fn handshake(&mut self) -> bool {
        let mut byte = [0u8; 1];
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            r = self.reader.read_exact(&mut byte) => r,
        };
        match read {
            Ok(_) => true,
            Err(source) => {
                self.report(source);
                false
            }
        }
    }

    async fn receive(&mut self) {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = self.reader.read(&mut buf) => r,
            };
            match read {
                Ok(0) => {
                    if !self.cancel.is_cancelled() {
                        info!(device = %self.device, channel = %self.kind, "closed by remote");
                    }
                    break;
                }
                Ok(n) => self.handle(&buf[..n]),
                Err(source) => {
                    self.report(source);
                    break;
                }
            }
        }
    }

    fn handle(&self, chunk: &[u8]) {
        match &self.handler {
            ChunkHandler::Forward(callback) => callback(Bytes::copy_from_slice(chunk)),
            ChunkHandler::Discard => {}
            ChunkHandler::Log => {
                debug!(device = %self.device, len = chunk.len(), data = ?chunk, "control message");
            }
        }
    }

    /// Errors during shutdown are expected and stay silent.
    fn report(&self, source: std::io::Error) {
        if self.cancel.is_cancelled() {
            return;
        }
        let err = MirrorError::ConnectionLost {
            channel: self.kind,
            source,
        };
        warn!(device = %self.device, "{err}");
    }
}
