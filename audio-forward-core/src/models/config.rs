use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_frame::AudioFormat;

/// Default port used by both ends when none is given.
pub const DEFAULT_PORT: u16 = 28200;

/// Largest UDP payload that fits a single IPv4 datagram.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// How the network session is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportMode {
    /// Outbound TCP connection to a listening receiver.
    Client { host: String, port: u16 },
    /// Listen on all interfaces and accept a single peer at a time.
    Server { port: u16 },
    /// Connectionless UDP datagrams to a fixed receiver.
    Datagram { host: String, port: u16 },
}

impl TransportMode {
    pub fn is_connection_oriented(&self) -> bool {
        !matches!(self, Self::Datagram { .. })
    }
}

impl Default for TransportMode {
    fn default() -> Self {
        Self::Server { port: DEFAULT_PORT }
    }
}

/// Wire framing, fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Unframed little-endian i16 stream.
    #[default]
    Raw,
    /// 8-byte length + timestamp header before every payload.
    Packet,
}

/// What happens when frames arrive faster than they are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Single slot; a newer frame overwrites an unconsumed one.
    LatestFrame,
    /// FIFO of `capacity` frames; incoming frames are dropped when full.
    BoundedQueue {
        #[serde(default = "default_queue_capacity")]
        capacity: usize,
    },
}

/// Queue depth when `bounded_queue` is selected without a capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::LatestFrame
    }
}

/// When the audio source is started relative to transport establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOrdering {
    /// Start capture only once a peer is connected.
    #[default]
    AfterConnect,
    /// Start capture as soon as the first establishment attempt returns.
    AfterFirstAttempt,
}

/// Reaction of the forwarding loop to a mid-stream send failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    /// Count the failure, re-establish, keep capturing.
    #[default]
    Continue,
    /// End the session with an error.
    FailFast,
}

/// Retry schedule for connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Leaves time for a port forward (e.g. `adb reverse`) to come up.
        Self {
            attempts: 15,
            delay_ms: 300,
        }
    }
}

/// Configuration for one forwarding session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    pub transport: TransportMode,

    pub framing: Framing,

    pub format: AudioFormat,

    /// Frames requested per capture callback (default: 192).
    pub frames_per_callback: u32,

    pub backpressure: BackpressurePolicy,

    pub ordering: CaptureOrdering,

    pub on_send_failure: SendFailurePolicy,

    /// Per-attempt connect timeout in milliseconds (default: 5000).
    pub connect_timeout_ms: u64,

    pub retry: RetryPolicy,

    /// Socket send buffer bound in bytes, or None for the OS default.
    pub send_buffer_bytes: Option<usize>,
}

impl ForwardingConfig {
    pub fn client(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: TransportMode::Client {
                host: host.into(),
                port,
            },
            ..Default::default()
        }
    }

    pub fn server(port: u16) -> Self {
        Self {
            transport: TransportMode::Server { port },
            ..Default::default()
        }
    }

    pub fn datagram(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: TransportMode::Datagram {
                host: host.into(),
                port,
            },
            framing: Framing::Packet,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Largest payload one capture callback can produce, in bytes.
    /// Largest PCM payload a single packet may carry on this transport.
    pub fn payload_limit(&self) -> Option<usize> {
        match self.transport {
            TransportMode::Datagram { .. } => {
                Some(MAX_DATAGRAM_BYTES - crate::processing::framing::HEADER_LEN)
            }
            _ => None,
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.frames_per_callback as usize * self.format.bytes_per_frame()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.format.validate()?;

        if self.frames_per_callback == 0 {
            return Err("frames per callback must be positive".into());
        }
        if let BackpressurePolicy::BoundedQueue { capacity } = self.backpressure {
            if capacity == 0 {
                return Err("queue capacity must be positive".into());
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect timeout must be positive".into());
        }
        if self.retry.attempts == 0 {
            return Err("retry attempts must be positive".into());
        }
        if self.send_buffer_bytes == Some(0) {
            return Err("send buffer size must be positive".into());
        }

        match &self.transport {
            TransportMode::Client { host, .. } if host.trim().is_empty() => {
                return Err("client mode requires a host".into());
            }
            TransportMode::Datagram { host, .. } => {
                if host.trim().is_empty() {
                    return Err("datagram mode requires a host".into());
                }
                if self.framing == Framing::Raw {
                    return Err("raw framing requires a connection-oriented transport".into());
                }
                let packet_len = self.max_payload_bytes() + crate::processing::framing::HEADER_LEN;
                if packet_len > MAX_DATAGRAM_BYTES {
                    return Err(format!(
                        "packet of {} bytes exceeds the datagram limit",
                        packet_len
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            framing: Framing::default(),
            format: AudioFormat::default(),
            frames_per_callback: 192,
            backpressure: BackpressurePolicy::default(),
            ordering: CaptureOrdering::default(),
            on_send_failure: SendFailurePolicy::default(),
            connect_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
            send_buffer_bytes: Some(256 * 1024),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ForwardingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport, TransportMode::Server { port: DEFAULT_PORT });
        assert_eq!(config.backpressure, BackpressurePolicy::LatestFrame);
        assert_eq!(config.retry.attempts, 15);
    }

    #[test]
    fn raw_framing_rejected_over_datagrams() {
        let mut config = ForwardingConfig::datagram("127.0.0.1", 9000);
        assert!(config.validate().is_ok());

        config.framing = Framing::Raw;
        let err = config.validate().unwrap_err();
        assert!(err.contains("connection-oriented"));
    }

    #[test]
    fn oversized_datagrams_rejected() {
        let mut config = ForwardingConfig::datagram("127.0.0.1", 9000);
        config.frames_per_callback = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_capacity_queue_rejected() {
        let config = ForwardingConfig {
            backpressure: BackpressurePolicy::BoundedQueue { capacity: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_requires_host() {
        assert!(ForwardingConfig::client("  ", 9000).validate().is_err());
    }

    #[test]
    fn parses_partial_json() {
        let json = r#"{
            "transport": { "kind": "client", "host": "10.0.0.2", "port": 4010 },
            "framing": "packet",
            "backpressure": { "bounded_queue": { "capacity": 4 } },
            "on_send_failure": "fail_fast"
        }"#;
        let config = ForwardingConfig::from_json(json).unwrap();
        assert_eq!(
            config.transport,
            TransportMode::Client {
                host: "10.0.0.2".into(),
                port: 4010
            }
        );
        assert_eq!(config.framing, Framing::Packet);
        assert_eq!(config.backpressure, BackpressurePolicy::BoundedQueue { capacity: 4 });
        assert_eq!(config.on_send_failure, SendFailurePolicy::FailFast);
        assert_eq!(config.frames_per_callback, 192);
    }

    #[test]
    fn bounded_queue_capacity_defaults() {
        let json = r#"{ "backpressure": { "bounded_queue": {} } }"#;
        let config = ForwardingConfig::from_json(json).unwrap();
        assert_eq!(
            config.backpressure,
            BackpressurePolicy::BoundedQueue {
                capacity: DEFAULT_QUEUE_CAPACITY
            }
        );
    }

    #[test]
    fn partial_retry_keeps_default_delay() {
        let json = r#"{ "retry": { "attempts": 3 } }"#;
        let config = ForwardingConfig::from_json(json).unwrap();
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay_ms, RetryPolicy::default().delay_ms);
    }

    #[test]
    fn payload_limit_applies_to_datagrams_only() {
        assert_eq!(
            ForwardingConfig::datagram("127.0.0.1", 9000).payload_limit(),
            Some(65_499)
        );
        assert_eq!(ForwardingConfig::server(9000).payload_limit(), None);
    }

    #[test]
    fn invalid_json_config_is_rejected() {
        let json = r#"{ "transport": { "kind": "datagram", "host": "h", "port": 1 }, "framing": "raw" }"#;
        assert!(ForwardingConfig::from_json(json).is_err());
    }
}
