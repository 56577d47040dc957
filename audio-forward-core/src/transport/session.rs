use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::models::diagnostics::{ConnectionState, TransportStats};

struct Link {
    state: ConnectionState,
    peer: Option<SocketAddr>,
}

/// Shared view of one network endpoint.
///
/// The socket itself stays with the owning transport on the forwarding thread;
/// this holds what other threads may look at or act on: connection state,
/// counters, and a clone of the active stream so `stop()` can shut it down and
/// release a blocked send.
pub struct TransportSession {
    link: Mutex<Link>,
    connected: AtomicBool,
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
    send_errors: AtomicU64,
    connections: AtomicU64,
    interrupt: Mutex<Option<TcpStream>>,
}

impl TransportSession {
    pub fn new() -> Self {
        Self {
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                peer: None,
            }),
            connected: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            interrupt: Mutex::new(None),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.link.lock().state = state;
    }

    pub fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.link.lock().peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record a newly established peer. `interrupt` is a clone of the stream
    /// used only by [`force_close`](Self::force_close).
    pub fn mark_connected(&self, peer: SocketAddr, interrupt: Option<TcpStream>) {
        {
            let mut link = self.link.lock();
            link.state = ConnectionState::Connected;
            link.peer = Some(peer);
        }
        *self.interrupt.lock() = interrupt;
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Release);
    }

    /// Drop the peer and fall back to `state` (Listening for a live server).
    pub fn mark_disconnected(&self, state: ConnectionState) {
        self.connected.store(false, Ordering::Release);
        *self.interrupt.lock() = None;
        let mut link = self.link.lock();
        link.state = state;
        link.peer = None;
    }

    /// Count a successful send; returns the packet total.
    pub fn record_sent(&self, bytes: usize) -> u64 {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a failed send; returns the error total.
    pub fn record_error(&self) -> u64 {
        self.send_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Shut down the active stream from another thread.
    ///
    /// A send blocked on a full peer returns with an error; the owning
    /// transport then tears its side down as for any failed send.
    pub fn force_close(&self) {
        if let Some(stream) = self.interrupt.lock().take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("force close: shutdown failed: {}", e);
            }
        }
        self.connected.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> TransportStats {
        let link = self.link.lock();
        TransportStats {
            state: link.state,
            peer: link.peer,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

impl Default for TransportSession {
    fn default() -> Self {
        Self::new()
    }
}
