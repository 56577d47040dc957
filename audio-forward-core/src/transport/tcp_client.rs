use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::models::diagnostics::ConnectionState;
use crate::models::error::TransportError;
use crate::session::stop_signal::StopSignal;
use crate::transport::session::TransportSession;
use crate::transport::socket;
use crate::transport::{Transport, TransportKind};

/// Outbound TCP connection to a listening receiver.
pub struct TcpClientTransport {
    host: String,
    port: u16,
    timeout: Duration,
    send_buffer: Option<usize>,
    addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    session: Arc<TransportSession>,
}

impl TcpClientTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
        send_buffer: Option<usize>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            send_buffer,
            addr: None,
            stream: None,
            session: Arc::new(TransportSession::new()),
        }
    }
}

impl Transport for TcpClientTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Client
    }

    fn prepare(&mut self) -> Result<(), TransportError> {
        let addr = socket::resolve(&self.host, self.port)?;
        log::debug!("resolved {}:{} to {}", self.host, self.port, addr);
        self.addr = Some(addr);
        Ok(())
    }

    fn establish(&mut self, stop: &StopSignal) -> Result<SocketAddr, TransportError> {
        self.disconnect();
        if stop.is_raised() {
            return Err(TransportError::Cancelled);
        }
        let addr = match self.addr {
            Some(addr) => addr,
            None => {
                self.prepare()?;
                self.addr.ok_or(TransportError::NotConnected)?
            }
        };

        log::info!("connecting to {}...", addr);
        self.session.set_state(ConnectionState::Connecting);
        let stream = match socket::connect_stream(addr, self.timeout, self.send_buffer, stop) {
            Ok(stream) => stream,
            Err(TransportError::Cancelled) => {
                self.session.set_state(ConnectionState::Disconnected);
                log::info!("connect to {} cancelled", addr);
                return Err(TransportError::Cancelled);
            }
            Err(e) => {
                self.session.set_state(ConnectionState::Disconnected);
                log::warn!("connect to {} failed: {}", addr, e);
                return Err(e);
            }
        };

        if let Err(e) = socket::tune_stream(&stream, self.send_buffer, true) {
            log::warn!("failed to tune socket for {}: {}", addr, e);
        }
        self.session.mark_connected(addr, stream.try_clone().ok());
        self.stream = Some(stream);
        log::info!("connected to {}", addr);
        Ok(addr)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        socket::write_stream(
            &mut self.stream,
            &self.session,
            ConnectionState::Disconnected,
            bytes,
        )
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log::info!("disconnected from {}:{}", self.host, self.port);
        }
        self.session.mark_disconnected(ConnectionState::Disconnected);
    }

    fn close(&mut self) {
        self.disconnect();
    }

    fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn client_for(port: u16) -> TcpClientTransport {
        TcpClientTransport::new("127.0.0.1", port, Duration::from_secs(2), Some(64 * 1024))
    }

    #[test]
    fn connects_and_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let receiver = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).unwrap();
            buf
        });

        let mut client = client_for(port);
        client.prepare().unwrap();
        let stop = StopSignal::new();
        let peer = client.establish(&stop).unwrap();
        assert_eq!(peer.port(), port);
        assert_eq!(client.session().state(), ConnectionState::Connected);

        client.send(&[10, 20, 30]).unwrap();
        client.close();

        assert_eq!(receiver.join().unwrap(), vec![10, 20, 30]);
        assert_eq!(client.session().stats().bytes_sent, 3);
    }

    #[test]
    fn refused_when_nobody_listens() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = client_for(port);
        client.prepare().unwrap();
        let stop = StopSignal::new();
        assert_eq!(client.establish(&stop), Err(TransportError::Refused));
        assert!(!client.is_connected());
        assert_eq!(client.session().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn prepare_rejects_bad_address() {
        let mut client = TcpClientTransport::new("bad host!", 9000, Duration::from_secs(1), None);
        assert!(matches!(
            client.prepare(),
            Err(TransportError::AddressUnparseable(_))
        ));
    }

    #[test]
    fn establish_honours_raised_stop() {
        let mut client = client_for(9);
        client.prepare().unwrap();
        let stop = StopSignal::new();
        stop.raise();
        assert_eq!(client.establish(&stop), Err(TransportError::Cancelled));
    }

    #[test]
    fn send_without_connection_fails() {
        let mut client = client_for(9);
        assert_eq!(client.send(&[1]), Err(TransportError::NotConnected));
        assert_eq!(client.session().stats().send_errors, 1);
    }
}
