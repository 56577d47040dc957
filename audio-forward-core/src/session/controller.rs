use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::models::config::ForwardingConfig;
use crate::models::diagnostics::SessionDiagnostics;
use crate::models::error::{ForwardError, TransportError};
use crate::models::state::{AtomicRunState, LoopPhase, RunState, SessionStatus};
use crate::processing::handoff::HandoffBuffer;
use crate::session::forwarding_loop::{establish_with_retry, ForwardingLoop, LoopShared};
use crate::traits::audio_source::AudioSource;
use crate::transport::{self, Transport, TransportSession};

/// Identifier handed out by [`SessionController::start`].
pub type SessionId = String;

/// Bookkeeping for the session currently owned by the controller.
struct ActiveSession {
    id: SessionId,
    started_at: String,
    shared: Arc<LoopShared>,
    transport: Arc<TransportSession>,
    handoff: Option<Arc<HandoffBuffer>>,
    local_addr: Option<SocketAddr>,
    /// Caller-driven transport (direct mode only).
    direct: Option<Arc<Mutex<Box<dyn Transport>>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ActiveSession {
    fn new(
        transport: Arc<TransportSession>,
        handoff: Option<Arc<HandoffBuffer>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            shared: Arc::new(LoopShared::new()),
            transport,
            handoff,
            local_addr: None,
            direct: None,
            handle: None,
        }
    }

    fn status(&self, run_state: RunState) -> SessionStatus {
        match self.shared.failure() {
            Some(reason) => SessionStatus::Error(reason),
            None => SessionStatus::from(run_state),
        }
    }

    fn diagnostics(&self, status: SessionStatus) -> SessionDiagnostics {
        SessionDiagnostics {
            session_id: self.id.clone(),
            started_at: self.started_at.clone(),
            status,
            phase: self.shared.phase(),
            handoff: self
                .handoff
                .as_ref()
                .map(|h| h.stats())
                .unwrap_or_default(),
            transport: self.transport.stats(),
            local_addr: self.local_addr,
            frames_forwarded: self.shared.frames_forwarded(),
            device_errors: self.shared.device_errors(),
            last_device_error: self.shared.last_device_error(),
        }
    }

    /// Unblock every wait the session may be in.
    fn interrupt(&self) {
        if let Some(handoff) = &self.handoff {
            handoff.shutdown();
        }
        self.shared.stop.raise();
        self.transport.force_close();
    }

    /// Join the forwarding thread and release the direct transport.
    fn finish(mut self) -> SessionDiagnostics {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("forwarding thread for session {} panicked", self.id);
            }
        }
        if let Some(direct) = self.direct.take() {
            direct.lock().close();
        }
        self.shared.set_phase(LoopPhase::Stopped);
        self.diagnostics(self.status(RunState::Stopped))
    }
}

/// Owner of at most one forwarding session.
///
/// All methods take `&self`; share it behind an `Arc` to drive it from
/// several threads. State machine:
///
/// ```text
/// stopped ──start──→ starting ──→ running ──stop──→ stopping ──→ stopped
///                       │            │
///                       └─ error ────┴─→ stopped + Error(reason)
/// ```
pub struct SessionController {
    run_state: Arc<AtomicRunState>,
    active: Mutex<Option<ActiveSession>>,
    last: Mutex<Option<SessionDiagnostics>>,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            run_state: Arc::new(AtomicRunState::default()),
            active: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    /// Start capturing from `source` and forwarding over the configured
    /// transport.
    ///
    /// Address parsing, bind/listen and source initialization happen before
    /// this returns; a failure there leaves the controller stopped with no
    /// thread spawned. Peer establishment and capture start happen on the
    /// forwarding thread.
    pub fn start(
        &self,
        config: ForwardingConfig,
        mut source: Box<dyn AudioSource>,
    ) -> Result<SessionId, ForwardError> {
        config.validate().map_err(ForwardError::InvalidConfig)?;

        let mut transport = transport::for_config(&config);
        let samples_hint = config.frames_per_callback as usize * config.format.channels as usize;
        let handoff = Arc::new(HandoffBuffer::new(
            config.backpressure,
            config.format,
            samples_hint,
        ));
        let (id, shared) = self.begin(transport.session(), Some(Arc::clone(&handoff)))?;

        let prepared = transport
            .prepare()
            .map_err(ForwardError::from)
            .and_then(|()| source.initialize(config.format).map_err(ForwardError::from));
        if let Err(e) = prepared {
            log::error!("failed to start session: {}", e);
            transport.close();
            self.abandon(&id);
            return Err(e);
        }

        let local_addr = transport.local_addr();
        let forwarding = ForwardingLoop::new(
            source,
            transport,
            handoff,
            &config,
            Arc::clone(&self.run_state),
            shared,
        );

        self.commit(&id, move |session| {
            session.local_addr = local_addr;
            let handle = thread::Builder::new()
                .name("audio-forward".into())
                .spawn(move || forwarding.run())
                .map_err(|e| ForwardError::Spawn(e.to_string()))?;
            session.handle = Some(handle);
            Ok(())
        })
    }

    /// Start a caller-driven session: no capture, bytes come from
    /// [`send_bytes`](Self::send_bytes).
    ///
    /// Blocks until a peer is established. A concurrent `stop()` cancels the
    /// wait.
    pub fn start_direct(&self, config: ForwardingConfig) -> Result<SessionId, ForwardError> {
        config.validate().map_err(ForwardError::InvalidConfig)?;

        let mut transport = transport::for_config(&config);
        let (id, shared) = self.begin(transport.session(), None)?;

        let established = transport.prepare().and_then(|()| {
            establish_with_retry(transport.as_mut(), config.retry, &shared.stop)
        });
        let peer = match established {
            Ok(peer) => peer,
            Err(e) => {
                log::error!("failed to start direct session: {}", e);
                transport.close();
                self.abandon(&id);
                return Err(e.into());
            }
        };
        log::info!("direct session {} established with {}", id, peer);

        let local_addr = transport.local_addr();
        self.commit(&id, move |session| {
            session.local_addr = local_addr;
            session.shared.set_phase(LoopPhase::Streaming);
            session.direct = Some(Arc::new(Mutex::new(transport)));
            Ok(())
        })
    }

    /// Send caller bytes through a direct session's transport.
    ///
    /// The bytes are sent as-is, without framing. A failed send leaves the
    /// transport disconnected; direct sessions do not re-establish.
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<(), ForwardError> {
        let (direct, shared) = {
            let active = self.active.lock();
            match active.as_ref() {
                Some(session) if self.run_state.is_running() => match &session.direct {
                    Some(direct) => (Arc::clone(direct), Arc::clone(&session.shared)),
                    None => return Err(ForwardError::NotRunning),
                },
                _ => return Err(ForwardError::NotRunning),
            }
        };

        direct.lock().send(bytes)?;
        shared.record_forwarded();
        Ok(())
    }

    /// Stop the session and wait for the forwarding thread to exit.
    ///
    /// Idempotent. Ordering: run state to Stopping (capture callbacks start
    /// returning Stop), handoff shutdown, stop signal and forced socket
    /// close, then join.
    pub fn stop(&self) {
        let session = {
            let mut active = self.active.lock();
            match self.run_state.load() {
                RunState::Stopping => return,
                RunState::Stopped if active.is_none() => return,
                RunState::Stopped => {}
                RunState::Starting | RunState::Running => {
                    self.run_state.store(RunState::Stopping)
                }
            }
            active.take()
        };

        if let Some(session) = session {
            log::info!("stopping session {}", session.id);
            session.interrupt();
            let diagnostics = session.finish();
            *self.last.lock() = Some(diagnostics);
        }
        self.run_state.store(RunState::Stopped);
        log::info!("session stopped");
    }

    pub fn status(&self) -> SessionStatus {
        let active = self.active.lock();
        let run_state = self.run_state.load();
        match active.as_ref() {
            Some(session) => session.status(run_state),
            None => SessionStatus::from(run_state),
        }
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.load()
    }

    pub fn is_running(&self) -> bool {
        self.run_state.is_running()
    }

    /// Address the transport is bound to, once known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.lock().as_ref().and_then(|s| s.local_addr)
    }

    /// Live diagnostics, or the final snapshot of the last session.
    pub fn diagnostics(&self) -> Option<SessionDiagnostics> {
        let active = self.active.lock();
        match active.as_ref() {
            Some(session) => Some(session.diagnostics(session.status(self.run_state.load()))),
            None => self.last.lock().clone(),
        }
    }

    /// Claim the controller for a new session: reap one that ended on its
    /// own, move stopped → starting and register the session so a concurrent
    /// `stop()` can reach it.
    fn begin(
        &self,
        transport: &Arc<TransportSession>,
        handoff: Option<Arc<HandoffBuffer>>,
    ) -> Result<(SessionId, Arc<LoopShared>), ForwardError> {
        let (reaped, id, shared) = {
            let mut active = self.active.lock();
            let reaped = if self.run_state.load() == RunState::Stopped {
                active.take()
            } else {
                None
            };
            if !self.run_state.transition(RunState::Stopped, RunState::Starting) {
                return Err(ForwardError::AlreadyRunning);
            }

            let session = ActiveSession::new(Arc::clone(transport), handoff);
            let id = session.id.clone();
            let shared = Arc::clone(&session.shared);
            *active = Some(session);
            (reaped, id, shared)
        };

        if let Some(old) = reaped {
            log::debug!("reaping session {}", old.id);
            let diagnostics = old.finish();
            *self.last.lock() = Some(diagnostics);
        }
        log::info!("starting session {}", id);
        Ok((id, shared))
    }

    /// Move starting → running and install the session's resources, unless
    /// a `stop()` got there first.
    fn commit(
        &self,
        id: &str,
        install: impl FnOnce(&mut ActiveSession) -> Result<(), ForwardError>,
    ) -> Result<SessionId, ForwardError> {
        let mut active = self.active.lock();
        let Some(session) = active.as_mut().filter(|s| s.id == id) else {
            return Err(TransportError::Cancelled.into());
        };
        if !self.run_state.transition(RunState::Starting, RunState::Running) {
            return Err(TransportError::Cancelled.into());
        }

        if let Err(e) = install(session) {
            log::error!("failed to start session {}: {}", id, e);
            *active = None;
            self.run_state.store(RunState::Stopped);
            return Err(e);
        }
        log::info!("session {} running", id);
        Ok(id.to_string())
    }

    /// Drop a session that failed to start.
    fn abandon(&self, id: &str) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
            self.run_state.store(RunState::Stopped);
        }
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}
