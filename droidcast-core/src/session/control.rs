//! Control-channel writes.
//!
//! A [`ControlSender`] shares the control channel's write half with the
//! session. Sends hold only the writer lock, never the session, and give up
//! when the session's stop token fires or the send timeout elapses, so a
//! peer that stops reading cannot hold up teardown.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MirrorError;

pub(crate) type SharedWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

/// Handle for writing to one session's control channel.
#[derive(Clone)]
pub struct ControlSender {
    device: String,
    writer: SharedWriter,
    cancel: CancellationToken,
    limit: Duration,
}

impl ControlSender {
    pub(crate) fn new(
        device: String,
        writer: SharedWriter,
        cancel: CancellationToken,
        limit: Duration,
    ) -> Self {
        Self {
            device,
            writer,
            cancel,
            limit,
        }
    }

    /// Write all of `data`.
    ///
    /// Fails with `ControlSendFailed` on socket errors, on timeout and once
    /// the session has begun stopping. A send cut short may have written
    /// part of `data`.
    pub async fn send(&self, data: &[u8]) -> Result<(), MirrorError> {
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(data).await
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "session is stopping",
            )),
            r = tokio::time::timeout(self.limit, write) => r.unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("control send did not complete within {:?}", self.limit),
                ))
            }),
        };

        result.map_err(|e| {
            warn!(device = %self.device, "control send failed: {e}");
            MirrorError::ControlSendFailed(e.to_string())
        })?;
        debug!(device = %self.device, len = data.len(), "control data sent");
        Ok(())
    }
}
