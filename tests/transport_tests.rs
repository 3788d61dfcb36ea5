//! Transport seam tests using an in-memory loopback link.

use radiophy_rs::transport::{
    TransportLayer, TransportProtocol, DEFAULT_MIN_BYTES, DEFAULT_RECEIVE_TIMEOUT_MS,
};
use radiophy_rs::{RadioError, Result};
use std::collections::VecDeque;

/// Echoes everything sent back into its own receive queue
#[derive(Default)]
struct Loopback {
    peer: Option<(String, TransportProtocol, u16, u16)>,
    queue: VecDeque<u8>,
    last_timeout_ms: Option<u32>,
    last_min_bytes: Option<usize>,
}

impl TransportLayer for Loopback {
    fn open_connection(
        &mut self,
        host: &str,
        protocol: TransportProtocol,
        port: u16,
        keep_alive: u16,
    ) -> Result<()> {
        if self.peer.is_some() {
            return Err(RadioError::Transport("already connected".into()));
        }
        self.peer = Some((host.to_string(), protocol, port, keep_alive));
        Ok(())
    }

    fn close_connection(&mut self) -> Result<()> {
        self.peer
            .take()
            .map(|_| ())
            .ok_or_else(|| RadioError::Transport("not connected".into()))
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.peer.is_none() {
            return Err(RadioError::Transport("not connected".into()));
        }
        self.queue.extend(data);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> usize {
        self.last_timeout_ms = Some(timeout_ms);
        let n = buf.len().min(self.queue.len());
        for (slot, byte) in buf.iter_mut().zip(self.queue.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn num_bytes_available(&mut self, timeout_ms: u32, min_bytes: usize) -> usize {
        self.last_timeout_ms = Some(timeout_ms);
        self.last_min_bytes = Some(min_bytes);
        self.queue.len()
    }
}

/// Test a full open, send, receive and close cycle
#[test]
fn test_loopback_session() {
    let mut link = Loopback::default();
    link.open_connection("broker.local", TransportProtocol::Tcp, 1883, 60)
        .unwrap();
    assert_eq!(
        link.peer,
        Some(("broker.local".to_string(), TransportProtocol::Tcp, 1883, 60))
    );

    link.send(&[0x10, 0x0C]).unwrap();
    link.send_str("MQTT").unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(link.receive(&mut buf, 50), 4);
    assert_eq!(buf, [0x10, 0x0C, b'M', b'Q']);
    assert_eq!(link.receive_default(&mut buf), 2);
    assert_eq!(&buf[..2], b"TT");
    assert_eq!(link.receive(&mut buf, 50), 0);

    link.close_connection().unwrap();
    assert!(link.close_connection().is_err());
}

/// Test that the provided methods forward the documented defaults
#[test]
fn test_default_arguments() {
    let mut link = Loopback::default();
    link.open_connection("10.0.0.2", TransportProtocol::Udp, 5683, 0)
        .unwrap();

    let mut buf = [0u8; 8];
    link.receive_default(&mut buf);
    assert_eq!(link.last_timeout_ms, Some(DEFAULT_RECEIVE_TIMEOUT_MS));
    assert_eq!(DEFAULT_RECEIVE_TIMEOUT_MS, 10_000);

    link.send(&[0u8; 12]).unwrap();
    assert_eq!(link.wait_for_bytes(), 12);
    assert_eq!(link.last_min_bytes, Some(DEFAULT_MIN_BYTES));
    assert_eq!(DEFAULT_MIN_BYTES, 10);
}

/// Test that transport failures surface as transport errors
#[test]
fn test_send_without_connection() {
    let mut link = Loopback::default();
    let err = link.send_str("hello").unwrap_err();
    assert!(matches!(err, RadioError::Transport(_)));
    assert!(err.to_string().contains("not connected"));
}

/// Test protocol names in both directions
#[test]
fn test_protocol_parsing() {
    for (text, protocol) in [
        ("TCP", TransportProtocol::Tcp),
        ("tcp", TransportProtocol::Tcp),
        ("Udp", TransportProtocol::Udp),
    ] {
        assert_eq!(text.parse::<TransportProtocol>().unwrap(), protocol);
    }
    assert_eq!(TransportProtocol::Tcp.to_string(), "TCP");
    assert!(matches!(
        "quic".parse::<TransportProtocol>(),
        Err(RadioError::Transport(_))
    ));
    assert_eq!(
        serde_json::to_string(&TransportProtocol::Udp).unwrap(),
        "\"Udp\""
    );
}
