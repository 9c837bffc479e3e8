//! Local port probing for the session's forward.

use std::net::{Ipv4Addr, TcpListener};

use tracing::debug;

use crate::error::MirrorError;

/// Probes a linear range of loopback ports by bind-then-release.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    /// First port probed.
    base_port: u16,
    /// Number of consecutive ports probed.
    max_attempts: u16,
}

impl PortAllocator {
    pub fn new(base_port: u16, max_attempts: u16) -> Self {
        Self {
            base_port,
            max_attempts,
        }
    }

    /// Return the first port in `base..base + max_attempts` that can be
    /// bound on `127.0.0.1`.
    ///
    /// The probe listener is dropped before returning, so the port is only
    /// reserved by convention until the forward binds it.
    pub fn allocate(&self) -> Result<u16, MirrorError> {
        for offset in 0..self.max_attempts {
            let Some(port) = self.base_port.checked_add(offset) else {
                break;
            };
            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
                Ok(_probe) => return Ok(port),
                Err(e) => debug!(port, "port busy: {e}"),
            }
        }
        Err(MirrorError::PortExhausted {
            base: self.base_port,
            attempts: self.max_attempts,
        })
    }
}
