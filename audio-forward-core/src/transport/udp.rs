use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use crate::models::diagnostics::ConnectionState;
use crate::models::error::TransportError;
use crate::session::stop_signal::StopSignal;
use crate::transport::session::TransportSession;
use crate::transport::socket::{self, STATS_LOG_INTERVAL};
use crate::transport::{Transport, TransportKind};

/// Connectionless datagram sender.
///
/// Each send is one datagram, so packet framing is required. Loss and
/// reordering are accepted; nothing is retransmitted. A failed send drops
/// the socket and the next `establish` opens a fresh one.
pub struct UdpTransport {
    host: String,
    port: u16,
    send_buffer: Option<usize>,
    addr: Option<SocketAddr>,
    socket: Option<UdpSocket>,
    session: Arc<TransportSession>,
}

impl UdpTransport {
    pub fn new(host: impl Into<String>, port: u16, send_buffer: Option<usize>) -> Self {
        Self {
            host: host.into(),
            port,
            send_buffer,
            addr: None,
            socket: None,
            session: Arc::new(TransportSession::new()),
        }
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn prepare(&mut self) -> Result<(), TransportError> {
        let addr = socket::resolve(&self.host, self.port)?;
        self.socket = Some(socket::connect_datagram(addr, self.send_buffer)?);
        self.addr = Some(addr);
        log::info!("datagram target {}", addr);
        Ok(())
    }

    fn establish(&mut self, stop: &StopSignal) -> Result<SocketAddr, TransportError> {
        if stop.is_raised() {
            return Err(TransportError::Cancelled);
        }
        if self.socket.is_none() {
            self.prepare()?;
            log::info!("datagram socket reopened");
        }
        let addr = self.addr.ok_or(TransportError::NotConnected)?;
        self.session.mark_connected(addr, None);
        Ok(addr)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let Some(sock) = self.socket.as_ref() else {
            self.session.record_error();
            return Err(TransportError::NotConnected);
        };

        let result = match sock.send(bytes) {
            Ok(n) if n == bytes.len() => Ok(()),
            Ok(n) => Err(TransportError::ShortWrite {
                written: n,
                expected: bytes.len(),
            }),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                let packets = self.session.record_sent(bytes.len());
                if packets % STATS_LOG_INTERVAL == 0 {
                    let stats = self.session.stats();
                    log::info!(
                        "stats: {} bytes, {} packets, {} errors",
                        stats.bytes_sent,
                        stats.packets_sent,
                        stats.send_errors
                    );
                }
                Ok(())
            }
            Err(e) => {
                let errors = self.session.record_error();
                log::warn!("datagram send failed ({} errors so far): {}", errors, e);
                self.socket = None;
                self.session.mark_disconnected(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        self.session.mark_disconnected(ConnectionState::Disconnected);
    }

    fn close(&mut self) {
        self.socket = None;
        self.disconnect();
    }

    fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sends_one_datagram_per_call() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut transport = UdpTransport::new("127.0.0.1", port, Some(64 * 1024));
        transport.prepare().unwrap();
        let stop = StopSignal::new();
        transport.establish(&stop).unwrap();
        assert!(transport.is_connected());

        transport.send(&[1, 2, 3]).unwrap();
        transport.send(&[4, 5]).unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[4, 5]);

        let stats = transport.session().stats();
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.bytes_sent, 5);
    }

    #[test]
    fn failed_send_reopens_on_establish() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut transport = UdpTransport::new("127.0.0.1", port, None);
        transport.prepare().unwrap();
        let stop = StopSignal::new();
        transport.establish(&stop).unwrap();

        // Larger than any datagram can be.
        assert!(transport.send(&vec![0u8; 70_000]).is_err());
        assert!(!transport.is_connected());
        assert_eq!(transport.local_addr(), None);

        transport.establish(&stop).unwrap();
        assert!(transport.local_addr().is_some());
        transport.send(&[7, 7]).unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[7, 7]);
        let stats = transport.session().stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.send_errors, 1);
    }

    #[test]
    fn send_before_prepare_fails() {
        let mut transport = UdpTransport::new("127.0.0.1", 9, None);
        assert_eq!(transport.send(&[0]), Err(TransportError::NotConnected));
    }
}
