//! # Transport Collaborator Interface
//!
//! Connection-oriented protocols (MQTT, HTTP and similar) run over a byte transport
//! that this crate does not implement. [`TransportLayer`] is the seam they consume:
//! companion network modules and host sockets implement it outside of this crate.
//!
//! ```rust
//! use radiophy_rs::transport::{TransportLayer, TransportProtocol};
//!
//! fn publish<T: TransportLayer>(link: &mut T, payload: &[u8]) -> radiophy_rs::Result<()> {
//!     link.open_connection("broker.local", TransportProtocol::Tcp, 1883, 60)?;
//!     link.send(payload)?;
//!     link.close_connection()
//! }
//! ```

use crate::error::{RadioError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default wait used by [`TransportLayer::receive_default`], ms
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u32 = 10_000;

/// Default threshold used by [`TransportLayer::wait_for_bytes`]
pub const DEFAULT_MIN_BYTES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => f.write_str("TCP"),
            TransportProtocol::Udp => f.write_str("UDP"),
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(TransportProtocol::Tcp),
            "UDP" => Ok(TransportProtocol::Udp),
            other => Err(RadioError::Transport(format!("unknown protocol {:?}", other))),
        }
    }
}

/// Byte-stream transport consumed by higher protocol layers.
pub trait TransportLayer {
    /// Connect to `host:port`. `keep_alive` is the TCP keep-alive interval in
    /// seconds, 0 to disable.
    fn open_connection(
        &mut self,
        host: &str,
        protocol: TransportProtocol,
        port: u16,
        keep_alive: u16,
    ) -> Result<()>;

    fn close_connection(&mut self) -> Result<()>;

    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Send UTF-8 text.
    fn send_str(&mut self, text: &str) -> Result<()> {
        self.send(text.as_bytes())
    }

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`. Returns the
    /// number of bytes read, 0 when nothing arrived.
    fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> usize;

    fn receive_default(&mut self, buf: &mut [u8]) -> usize {
        self.receive(buf, DEFAULT_RECEIVE_TIMEOUT_MS)
    }

    /// Bytes buffered once at least `min_bytes` are available or `timeout_ms` elapses.
    fn num_bytes_available(&mut self, timeout_ms: u32, min_bytes: usize) -> usize;

    fn wait_for_bytes(&mut self) -> usize {
        self.num_bytes_available(DEFAULT_RECEIVE_TIMEOUT_MS, DEFAULT_MIN_BYTES)
    }
}
