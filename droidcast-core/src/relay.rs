//! Bounded hand-off from a session's video callback to a viewer.
//!
//! The receive worker must never block on the viewer, so the callback only
//! does a `try_send` into a bounded queue. When the queue is full the new
//! chunk is dropped and counted (drop-newest); it is never retried. A drain
//! worker forwards queued chunks to a [`VideoConsumer`] in order.
//!
//! A relay lives exactly as long as its viewer: create one per viewer
//! connection and [`close`](VideoRelay::close) it when the viewer goes away.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::session::VideoCallback;

/// Outward destination of relayed video bytes.
#[async_trait]
pub trait VideoConsumer: Send + 'static {
    async fn deliver(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Called once after the last delivery.
    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    delivered_bytes: AtomicU64,
}

/// Point-in-time relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub queued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub delivered_bytes: u64,
}

pub struct VideoRelay {
    tx: mpsc::Sender<Bytes>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    drain: Option<JoinHandle<()>>,
}

impl VideoRelay {
    /// Start a relay draining into `consumer`.
    pub fn spawn<C: VideoConsumer>(config: &RelayConfig, consumer: C) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(drain(rx, consumer, counters.clone(), cancel.clone()));
        Self {
            tx,
            counters,
            cancel,
            drain: Some(drain),
        }
    }

    /// Callback to hand to [`MirrorSession::start`](crate::MirrorSession::start).
    pub fn callback(&self) -> VideoCallback {
        let tx = self.tx.clone();
        let counters = self.counters.clone();
        Arc::new(move |chunk: Bytes| match tx.try_send(chunk) {
            Ok(()) => {
                counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(chunk)) => {
                let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(len = chunk.len(), dropped, "relay queue full; chunk dropped");
            }
            Err(TrySendError::Closed(_)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            delivered_bytes: self.counters.delivered_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// `false` once the drain worker has stopped (viewer gone).
    pub fn is_open(&self) -> bool {
        self.drain.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the drain worker, discarding anything still queued.
    pub async fn close(mut self) -> RelayStats {
        self.cancel.cancel();
        if let Some(handle) = self.drain.take() {
            if let Err(e) = handle.await {
                warn!("relay drain worker panicked: {e}");
            }
        }
        let stats = self.stats();
        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            bytes = stats.delivered_bytes,
            "video relay closed"
        );
        stats
    }
}

impl Drop for VideoRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain<C: VideoConsumer>(
    mut rx: mpsc::Receiver<Bytes>,
    mut consumer: C,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            c = rx.recv() => c,
        };
        let Some(chunk) = chunk else { break };
        let len = chunk.len() as u64;
        if let Err(e) = consumer.deliver(chunk).await {
            warn!("video consumer failed: {e}; relay stopping");
            break;
        }
        counters.delivered.fetch_add(1, Ordering::Relaxed);
        counters.delivered_bytes.fetch_add(len, Ordering::Relaxed);
    }
    rx.close();
    if let Err(e) = consumer.finish().await {
        debug!("video consumer finish failed: {e}");
    }
}
