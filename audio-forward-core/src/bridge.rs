//! String-in, bool-out surface for host applications.
//!
//! Hosts that cannot hold Rust types (a JNI shim, a scripting layer) drive a
//! session through [`ForwardingBridge`]: modes and endpoints arrive as
//! strings, results go back as booleans and status strings, and errors are
//! logged rather than returned.

use crate::models::config::{ForwardingConfig, Framing, TransportMode, DEFAULT_PORT};
use crate::models::error::{CaptureError, ForwardError};
use crate::session::controller::SessionController;
use crate::traits::audio_source::AudioSource;

/// Builds the capture source for a session about to start.
pub type SourceFactory =
    Box<dyn Fn(&ForwardingConfig) -> Result<Box<dyn AudioSource>, CaptureError> + Send + Sync>;

/// Parse a mode name and endpoint string into a transport.
///
/// `client` and `udp` take `host:port` (IPv6 hosts in brackets, port
/// defaults to 28200); `server` takes a bare port, empty for the default.
pub fn parse_endpoint(mode: &str, host_or_port: &str) -> Result<TransportMode, ForwardError> {
    let endpoint = host_or_port.trim();
    match mode.trim().to_ascii_lowercase().as_str() {
        "server" => Ok(TransportMode::Server {
            port: parse_port(endpoint)?,
        }),
        "client" => {
            let (host, port) = split_host_port(endpoint)?;
            Ok(TransportMode::Client { host, port })
        }
        "udp" | "datagram" => {
            let (host, port) = split_host_port(endpoint)?;
            Ok(TransportMode::Datagram { host, port })
        }
        other => Err(ForwardError::InvalidConfig(format!("unknown mode: {:?}", other))),
    }
}

fn parse_port(text: &str) -> Result<u16, ForwardError> {
    if text.is_empty() {
        return Ok(DEFAULT_PORT);
    }
    text.parse()
        .map_err(|_| ForwardError::InvalidConfig(format!("invalid port: {:?}", text)))
}

fn split_host_port(endpoint: &str) -> Result<(String, u16), ForwardError> {
    if endpoint.is_empty() {
        return Err(ForwardError::InvalidConfig("missing host".into()));
    }
    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| ForwardError::InvalidConfig(format!("invalid host: {:?}", endpoint)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => {
                return Err(ForwardError::InvalidConfig(format!(
                    "invalid endpoint: {:?}",
                    endpoint
                )))
            }
        };
        return Ok((host.to_string(), port));
    }
    match endpoint.rsplit_once(':') {
        // More than one colon without brackets: a bare IPv6 address.
        Some((host, _)) if host.contains(':') => Ok((endpoint.to_string(), DEFAULT_PORT)),
        Some((host, port)) => Ok((host.to_string(), parse_port(port)?)),
        None => Ok((endpoint.to_string(), DEFAULT_PORT)),
    }
}

/// Session facade keyed by mode strings.
pub struct ForwardingBridge {
    controller: SessionController,
    source_factory: SourceFactory,
    template: ForwardingConfig,
}

impl ForwardingBridge {
    pub fn new(source_factory: SourceFactory) -> Self {
        Self {
            controller: SessionController::new(),
            source_factory,
            template: ForwardingConfig::default(),
        }
    }

    /// Settings other than transport and sample rate come from `template`.
    pub fn with_template(mut self, template: ForwardingConfig) -> Self {
        self.template = template;
        self
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    fn config_for(
        &self,
        mode: &str,
        host_or_port: &str,
        sample_rate: u32,
    ) -> Result<ForwardingConfig, ForwardError> {
        let transport = parse_endpoint(mode, host_or_port)?;
        let mut config = self.template.clone();
        if !transport.is_connection_oriented() {
            config.framing = Framing::Packet;
        }
        config.transport = transport;
        config.format.sample_rate = sample_rate;
        Ok(config)
    }

    /// Start capture-and-forward. Returns false if a session is already
    /// running or anything fails before the forwarding thread starts.
    pub fn start_forwarding(&self, mode: &str, host_or_port: &str, sample_rate: u32) -> bool {
        let result = self.config_for(mode, host_or_port, sample_rate).and_then(|config| {
            let source = (self.source_factory)(&config)?;
            self.controller.start(config, source)
        });
        match result {
            Ok(id) => {
                log::info!("forwarding started ({} {}): {}", mode, host_or_port, id);
                true
            }
            Err(e) => {
                log::error!("start_forwarding({}, {}) failed: {}", mode, host_or_port, e);
                false
            }
        }
    }

    /// Start a session fed by [`send_bytes`](Self::send_bytes). Blocks until
    /// a peer is established.
    pub fn start_direct_forwarding(
        &self,
        mode: &str,
        host_or_port: &str,
        sample_rate: u32,
    ) -> bool {
        let result = self
            .config_for(mode, host_or_port, sample_rate)
            .and_then(|config| self.controller.start_direct(config));
        match result {
            Ok(id) => {
                log::info!("direct forwarding started ({} {}): {}", mode, host_or_port, id);
                true
            }
            Err(e) => {
                log::error!(
                    "start_direct_forwarding({}, {}) failed: {}",
                    mode,
                    host_or_port,
                    e
                );
                false
            }
        }
    }

    pub fn stop_forwarding(&self) {
        self.controller.stop();
    }

    /// `"Running"`, `"Stopped"`, `"Error: <reason>"`, ...
    pub fn get_status(&self) -> String {
        self.controller.status().to_string()
    }

    pub fn get_diagnostics_json(&self) -> String {
        self.controller
            .diagnostics()
            .map(|d| d.to_json())
            .unwrap_or_else(|| "{}".to_string())
    }

    pub fn send_bytes(&self, bytes: &[u8]) -> bool {
        match self.controller.send_bytes(bytes) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("send_bytes({} bytes) failed: {}", bytes.len(), e);
                false
            }
        }
    }

    /// Send `len` bytes starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for the duration of the
    /// call. A null `ptr` or zero `len` is rejected.
    pub unsafe fn send_raw(&self, ptr: *const u8, len: usize) -> bool {
        if ptr.is_null() || len == 0 {
            return false;
        }
        // SAFETY: the caller guarantees `ptr` is readable for `len` bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        self.send_bytes(bytes)
    }
}
