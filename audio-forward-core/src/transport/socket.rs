//! Socket setup shared by the transports.
//!
//! std exposes neither the listen backlog nor `SO_SNDBUF`, so sockets are
//! built with `socket2` and converted into std types once configured.

use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::models::diagnostics::ConnectionState;
use crate::models::error::TransportError;
use crate::session::stop_signal::StopSignal;
use crate::transport::session::TransportSession;

/// Log transport statistics every this many packets.
pub const STATS_LOG_INTERVAL: u64 = 1000;

/// How often a pending connect or accept checks for stop.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Parse `host` as an IP literal, falling back to name resolution.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::AddressUnparseable(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| TransportError::AddressUnparseable(host.to_string()))
}

/// Open a TCP connection bounded by `timeout`.
///
/// The connect runs non-blocking and is checked every
/// [`STOP_POLL_INTERVAL`]; raising `stop` abandons it with `Cancelled`.
/// The returned stream is blocking.
pub fn connect_stream(
    addr: SocketAddr,
    timeout: Duration,
    send_buffer: Option<usize>,
    stop: &StopSignal,
) -> Result<TcpStream, TransportError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if let Some(size) = send_buffer {
        socket.set_send_buffer_size(size)?;
    }
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => return connected(socket),
        Err(e) if connect_pending(&e) => {}
        Err(e) => return Err(TransportError::from_connect(&e)),
    }

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(e) = socket.take_error()? {
            return Err(TransportError::from_connect(&e));
        }
        match socket.peer_addr() {
            Ok(_) => return connected(socket),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(TransportError::from_connect(&e)),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::Timeout);
        }
        if stop.wait_timeout(STOP_POLL_INTERVAL.min(deadline - now)) {
            return Err(TransportError::Cancelled);
        }
    }
}

fn connected(socket: Socket) -> Result<TcpStream, TransportError> {
    socket.set_nonblocking(false)?;
    Ok(socket.into())
}

#[cfg(unix)]
fn connect_pending(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(unix))]
fn connect_pending(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Apply low-latency tuning to an established stream.
pub fn tune_stream(
    stream: &TcpStream,
    send_buffer: Option<usize>,
    keepalive: bool,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    if let Some(size) = send_buffer {
        sock.set_send_buffer_size(size)?;
    }
    if keepalive {
        sock.set_keepalive(true)?;
    }
    Ok(())
}

/// Bind a non-blocking listener on all interfaces.
pub fn bind_listener(port: u16, backlog: i32) -> Result<TcpListener, TransportError> {
    let bind_err = |e: io::Error| TransportError::Bind(format!("port {}: {}", port, e));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    Ok(socket.into())
}

/// Bind an ephemeral UDP socket connected to `peer`.
pub fn connect_datagram(
    peer: SocketAddr,
    send_buffer: Option<usize>,
) -> Result<UdpSocket, TransportError> {
    let socket = Socket::new(Domain::for_address(peer), Type::DGRAM, Some(Protocol::UDP))?;
    if let Some(size) = send_buffer {
        socket.set_send_buffer_size(size)?;
    }
    let local: SocketAddr = if peer.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    socket.bind(&local.into())?;
    socket.connect(&peer.into())?;
    Ok(socket.into())
}

/// Write the whole payload to the active stream.
///
/// On failure the stream is shut down and dropped, the session flips to
/// `fallback` and the error counter is bumped. Never reports a partial write
/// as success. std sends with `MSG_NOSIGNAL`, so a broken pipe is an error
/// here rather than a SIGPIPE.
pub fn write_stream(
    slot: &mut Option<TcpStream>,
    session: &TransportSession,
    fallback: ConnectionState,
    bytes: &[u8],
) -> Result<(), TransportError> {
    let Some(stream) = slot.as_mut() else {
        session.record_error();
        return Err(TransportError::NotConnected);
    };

    match stream.write_all(bytes) {
        Ok(()) => {
            let packets = session.record_sent(bytes.len());
            if packets % STATS_LOG_INTERVAL == 0 {
                let stats = session.stats();
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
            let errors = session.record_error();
            log::warn!("send failed ({} errors so far): {}", errors, e);
            if let Some(stream) = slot.take() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            session.mark_disconnected(fallback);
            Err(e.into())
        }
    }
}

/// Loopback listener that never accepts, with its accept queue already
/// full, so a further connect stays pending until it times out.
#[cfg(test)]
pub(crate) fn saturated_listener() -> (Socket, Vec<TcpStream>, SocketAddr) {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
    listener
        .bind(&SocketAddr::from(([127, 0, 0, 1], 0)).into())
        .unwrap();
    listener.listen(0).unwrap();
    let addr = listener.local_addr().unwrap().as_socket().unwrap();

    let mut queued = Vec::new();
    while queued.len() < 16 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => queued.push(stream),
            Err(_) => break,
        }
    }
    (listener, queued, addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn resolves_ip_literals() {
        let addr = resolve("127.0.0.1", 4000).unwrap();
        assert_eq!(addr, "127.0.0.1:4000".parse().unwrap());

        let addr = resolve(" ::1 ", 4000).unwrap();
        assert!(addr.is_ipv6());
    }

    #[test]
    fn rejects_unparseable_hosts() {
        let err = resolve("not a host!", 4000).unwrap_err();
        assert!(matches!(err, TransportError::AddressUnparseable(_)));
    }

    #[test]
    fn connect_reports_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let err = connect_stream(addr, Duration::from_secs(2), None, &StopSignal::new()).unwrap_err();
        assert_eq!(err, TransportError::Refused);
    }

    #[test]
    fn pending_connect_is_cancelled_by_stop() {
        let (_listener, _backlog, addr) = saturated_listener();
        let stop = Arc::new(StopSignal::new());
        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                stop.raise();
            })
        };

        let started = Instant::now();
        let result = connect_stream(addr, Duration::from_secs(4), None, &stop);
        stopper.join().unwrap();

        assert_eq!(result.unwrap_err(), TransportError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn bind_reports_port_in_use() {
        let first = bind_listener(0, 1).unwrap();
        let port = first.local_addr().unwrap().port();

        let second = bind_listener(port, 1);
        assert!(matches!(second, Err(TransportError::Bind(_))));
    }
}
