use thiserror::Error;

/// Errors raised by an audio source (device open, start, stream faults).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("source not initialized")]
    NotInitialized,

    #[error("source already running")]
    AlreadyRunning,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("device error (code {code}): {message}")]
    Device { code: i32, message: String },
}

/// Errors raised while establishing or using a network session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("address unparseable: {0}")]
    AddressUnparseable(String),

    #[error("connect timed out")]
    Timeout,

    #[error("connection refused")]
    Refused,

    #[error("bind failed: {0}")]
    Bind(String),

    #[error("operation cancelled by stop")]
    Cancelled,

    #[error("not connected")]
    NotConnected,

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("socket error: {0}")]
    Io(String),
}

impl TransportError {
    /// Map an OS-level connect error onto the descriptive variants.
    pub fn from_connect(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            std::io::ErrorKind::ConnectionRefused => Self::Refused,
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors surfaced by the session controller and bridge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForwardError {
    #[error("session already running")]
    AlreadyRunning,

    #[error("session not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to spawn forwarding thread: {0}")]
    Spawn(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn connect_errors_map_to_descriptive_variants() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(TransportError::from_connect(&refused), TransportError::Refused);

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(TransportError::from_connect(&timed_out), TransportError::Timeout);

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(matches!(TransportError::from_connect(&other), TransportError::Io(_)));
    }

    #[test]
    fn forward_error_wraps_sources() {
        let err: ForwardError = CaptureError::DeviceNotAvailable.into();
        assert_eq!(err.to_string(), "capture: device not available");

        let err: ForwardError = TransportError::Refused.into();
        assert_eq!(err.to_string(), "transport: connection refused");
    }
}
