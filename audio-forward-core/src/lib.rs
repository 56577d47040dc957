//! # audio-forward-core
//!
//! Low-latency PCM forwarding: capture callbacks hand frames to a dedicated
//! forwarding thread, which streams them to a single network peer.
//!
//! Device backends implement the `AudioSource` trait and plug into the
//! `SessionController`; `audio-forward-cpal` provides one for real input
//! devices.
//!
//! ## Architecture
//!
//! ```text
//! audio-forward-core (this crate)
//! ├── traits/       ← AudioSource, SourceCallbacks
//! ├── models/       ← ForwardingConfig, AudioFrame, RunState, SessionStatus, errors, diagnostics
//! ├── processing/   ← HandoffBuffer, FrameEncoder, PCM conversions
//! ├── transport/    ← Transport trait, TCP client/server, UDP, TransportSession
//! ├── session/      ← SessionController, ForwardingLoop, StopSignal
//! ├── sources/      ← ManualSource, ToneSource
//! └── bridge        ← string/bool facade for host applications
//! ```
//!
//! ## Data flow
//!
//! ```text
//! [AudioSource] → [HandoffBuffer] → [ForwardingLoop] → [FrameEncoder] → [Transport] → peer
//!   (rt thread)    (latest / queue)    (audio-forward)     (raw / packet)
//! ```

pub mod bridge;
pub mod models;
pub mod processing;
pub mod session;
pub mod sources;
pub mod traits;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use bridge::{ForwardingBridge, SourceFactory};
pub use models::audio_frame::{AudioFormat, AudioFrame};
pub use models::config::{
    BackpressurePolicy, CaptureOrdering, ForwardingConfig, Framing, RetryPolicy,
    SendFailurePolicy, TransportMode, DEFAULT_PORT,
};
pub use models::diagnostics::{ConnectionState, HandoffStats, SessionDiagnostics, TransportStats};
pub use models::error::{CaptureError, ForwardError, TransportError};
pub use models::state::{LoopPhase, RunState, SessionStatus};
pub use processing::framing::{FrameEncoder, PacketHeader};
pub use processing::handoff::{Handoff, HandoffBuffer};
pub use session::controller::{SessionController, SessionId};
pub use sources::{ManualSource, ManualSourceHandle, ToneSource};
pub use traits::audio_source::{
    AudioSource, CallbackAction, ErrorCallback, FrameCallback, SourceCallbacks, SourceInfo,
};
pub use transport::{Transport, TransportKind};
