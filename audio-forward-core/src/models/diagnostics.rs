use std::net::SocketAddr;

use serde::Serialize;

use super::state::{LoopPhase, SessionStatus};

/// Counters of the real-time handoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandoffStats {
    /// Frames offered by the producer.
    pub published: u64,
    /// Frames handed to the consumer.
    pub taken: u64,
    /// Frames lost to overwrite or queue overflow.
    pub dropped: u64,
    /// Frames currently waiting.
    pub pending: usize,
}

/// Connection state of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Listening,
    Connected,
}

/// Snapshot of a transport session's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub state: ConnectionState,
    pub peer: Option<SocketAddr>,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub send_errors: u64,
    /// Number of peers established over the session's lifetime.
    pub connections: u64,
}

/// Diagnostics for a forwarding session, serializable for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    pub session_id: String,
    pub started_at: String,
    pub status: SessionStatus,
    pub phase: LoopPhase,
    pub handoff: HandoffStats,
    pub transport: TransportStats,
    /// Bound listener or socket address, once known.
    pub local_addr: Option<SocketAddr>,
    pub frames_forwarded: u64,
    pub device_errors: u64,
    pub last_device_error: Option<String>,
}

impl SessionDiagnostics {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_serialize_to_json() {
        let diagnostics = SessionDiagnostics {
            session_id: "abc".into(),
            started_at: "2024-01-01T00:00:00+00:00".into(),
            status: SessionStatus::Error("refused".into()),
            phase: LoopPhase::Stopped,
            handoff: HandoffStats {
                published: 3,
                taken: 1,
                dropped: 2,
                pending: 0,
            },
            transport: TransportStats::default(),
            local_addr: Some("0.0.0.0:28200".parse().unwrap()),
            frames_forwarded: 1,
            device_errors: 0,
            last_device_error: None,
        };

        let value: serde_json::Value = serde_json::from_str(&diagnostics.to_json()).unwrap();
        assert_eq!(value["session_id"], "abc");
        assert_eq!(value["status"]["status"], "error");
        assert_eq!(value["status"]["reason"], "refused");
        assert_eq!(value["phase"], "stopped");
        assert_eq!(value["handoff"]["dropped"], 2);
        assert_eq!(value["transport"]["state"], "disconnected");
        assert_eq!(value["local_addr"], "0.0.0.0:28200");
    }
}
