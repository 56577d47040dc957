use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Process-wide run flag of a forwarding session.
///
/// ```text
/// stopped → starting → running → stopping → stopped
///              └───────────────────↗
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Lock-free cell holding a [`RunState`], read from the audio callback thread.
#[derive(Debug)]
pub struct AtomicRunState(AtomicU8);

impl AtomicRunState {
    pub fn new(state: RunState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition `from → to`; returns false if the current state differs.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.load() == RunState::Running
    }
}

impl Default for AtomicRunState {
    fn default() -> Self {
        Self::new(RunState::Stopped)
    }
}

/// Coarse status reported to the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SessionStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error(String),
}

impl SessionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<RunState> for SessionStatus {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Stopped => Self::Stopped,
            RunState::Starting => Self::Starting,
            RunState::Running => Self::Running,
            RunState::Stopping => Self::Stopping,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("Stopped"),
            Self::Starting => f.write_str("Starting"),
            Self::Running => f.write_str("Running"),
            Self::Stopping => f.write_str("Stopping"),
            Self::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Position of the forwarding loop in its state machine.
///
/// ```text
/// idle → connecting | listening → peer_connected → capture_starting → streaming
///                                                                        ↓
///                                                       stopping → stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Connecting,
    Listening,
    PeerConnected,
    CaptureStarting,
    Streaming,
    Stopping,
    Stopped,
}
