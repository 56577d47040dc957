use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use crate::models::diagnostics::ConnectionState;
use crate::models::error::TransportError;
use crate::session::stop_signal::StopSignal;
use crate::transport::session::TransportSession;
use crate::transport::socket;
use crate::transport::{Transport, TransportKind};

/// Single-peer TCP listener.
///
/// Binds all interfaces with a backlog of 1. A failed send drops only the
/// peer; the listener stays up so the next `establish` can accept a new one.
pub struct TcpServerTransport {
    port: u16,
    send_buffer: Option<usize>,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    session: Arc<TransportSession>,
}

impl TcpServerTransport {
    pub fn new(port: u16, send_buffer: Option<usize>) -> Self {
        Self {
            port,
            send_buffer,
            listener: None,
            stream: None,
            session: Arc::new(TransportSession::new()),
        }
    }

    fn accept_once(&mut self, stream: TcpStream, peer: SocketAddr) -> SocketAddr {
        if let Err(e) = socket::tune_stream(&stream, self.send_buffer, false) {
            log::warn!("failed to tune socket for {}: {}", peer, e);
        }
        self.session.mark_connected(peer, stream.try_clone().ok());
        self.stream = Some(stream);
        log::info!("peer connected: {}", peer);
        peer
    }
}

impl Transport for TcpServerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Server
    }

    fn prepare(&mut self) -> Result<(), TransportError> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = socket::bind_listener(self.port, 1)?;
        if let Ok(addr) = listener.local_addr() {
            log::info!("listening on {}", addr);
        }
        self.listener = Some(listener);
        self.session.set_state(ConnectionState::Listening);
        Ok(())
    }

    fn establish(&mut self, stop: &StopSignal) -> Result<SocketAddr, TransportError> {
        self.disconnect();

        loop {
            if stop.is_raised() {
                return Err(TransportError::Cancelled);
            }
            let accepted = match self.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => return Err(TransportError::Bind("listener not bound".into())),
            };
            match accepted {
                Ok((stream, peer)) => return Ok(self.accept_once(stream, peer)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    stop.wait_timeout(socket::STOP_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        socket::write_stream(
            &mut self.stream,
            &self.session,
            ConnectionState::Listening,
            bytes,
        )
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log::info!("peer disconnected");
        }
        let state = if self.listener.is_some() {
            ConnectionState::Listening
        } else {
            ConnectionState::Disconnected
        };
        self.session.mark_disconnected(state);
    }

    fn close(&mut self) {
        self.disconnect();
        self.listener = None;
        self.session.set_state(ConnectionState::Disconnected);
    }

    fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}
