//! Network session abstraction.
//!
//! A transport is prepared synchronously when a session starts (address
//! parsing, bind/listen), then establishes peers and sends on the forwarding
//! thread only. Other threads interact through the shared
//! [`TransportSession`].

pub mod session;
pub mod socket;
pub mod tcp_client;
pub mod tcp_server;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::models::config::{ForwardingConfig, TransportMode};
use crate::models::error::TransportError;
use crate::session::stop_signal::StopSignal;

pub use session::TransportSession;
pub use tcp_client::TcpClientTransport;
pub use tcp_server::TcpServerTransport;
pub use udp::UdpTransport;

/// Session-establishment flavour of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Client,
    Server,
    Datagram,
}

/// Byte-oriented network session with explicit establishment.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Synchronous pre-flight: resolve addresses, bind, listen.
    ///
    /// Failures here are fatal to starting a session.
    fn prepare(&mut self) -> Result<(), TransportError>;

    /// One attempt at establishing a peer. Blocking; returns `Cancelled`
    /// once `stop` is raised.
    fn establish(&mut self, stop: &StopSignal) -> Result<SocketAddr, TransportError>;

    /// Deliver the whole payload or fail. A failure leaves the session
    /// disconnected.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Drop the current peer, keeping any listener.
    fn disconnect(&mut self);

    /// Release every socket.
    fn close(&mut self);

    fn session(&self) -> &Arc<TransportSession>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn is_connected(&self) -> bool {
        self.session().is_connected()
    }
}

/// Build the transport selected by `config`.
pub fn for_config(config: &ForwardingConfig) -> Box<dyn Transport> {
    match &config.transport {
        TransportMode::Client { host, port } => Box::new(TcpClientTransport::new(
            host.clone(),
            *port,
            config.connect_timeout(),
            config.send_buffer_bytes,
        )),
        TransportMode::Server { port } => {
            Box::new(TcpServerTransport::new(*port, config.send_buffer_bytes))
        }
        TransportMode::Datagram { host, port } => Box::new(UdpTransport::new(
            host.clone(),
            *port,
            config.send_buffer_bytes,
        )),
    }
}
