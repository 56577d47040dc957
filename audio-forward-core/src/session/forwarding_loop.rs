use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::models::audio_frame::AudioFrame;
use crate::models::config::{
    CaptureOrdering, ForwardingConfig, RetryPolicy, SendFailurePolicy,
};
use crate::models::error::{CaptureError, TransportError};
use crate::models::state::{AtomicRunState, LoopPhase, RunState};
use crate::processing::framing::FrameEncoder;
use crate::processing::handoff::{Handoff, HandoffBuffer};
use crate::session::stop_signal::StopSignal;
use crate::traits::audio_source::{
    AudioSource, CallbackAction, ErrorCallback, FrameCallback, SourceCallbacks,
};
use crate::transport::{Transport, TransportKind};

/// State shared between the forwarding thread, the capture callbacks and the
/// controller.
#[derive(Debug)]
pub struct LoopShared {
    pub stop: StopSignal,
    phase: Mutex<LoopPhase>,
    failure: Mutex<Option<String>>,
    frames_forwarded: AtomicU64,
    device_errors: AtomicU64,
    last_device_error: Mutex<Option<String>>,
}

impl LoopShared {
    pub fn new() -> Self {
        Self {
            stop: StopSignal::new(),
            phase: Mutex::new(LoopPhase::Idle),
            failure: Mutex::new(None),
            frames_forwarded: AtomicU64::new(0),
            device_errors: AtomicU64::new(0),
            last_device_error: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> LoopPhase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: LoopPhase) {
        let mut current = self.phase.lock();
        if *current != phase {
            log::debug!("phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    /// Reason the session ended in error, if it did.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn fail(&self, reason: String) {
        self.failure.lock().get_or_insert(reason);
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    pub fn record_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn device_errors(&self) -> u64 {
        self.device_errors.load(Ordering::Relaxed)
    }

    pub fn last_device_error(&self) -> Option<String> {
        self.last_device_error.lock().clone()
    }

    pub fn record_device_error(&self, error: &CaptureError) {
        let count = self.device_errors.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("device error #{}: {}", count, error);
        *self.last_device_error.lock() = Some(error.to_string());
    }
}

impl Default for LoopShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the capture callbacks.
///
/// The frame callback only copies into the handoff and reads the run state;
/// it asks the source to stop once the session is no longer running.
pub fn capture_callbacks(
    handoff: Arc<HandoffBuffer>,
    run_state: Arc<AtomicRunState>,
    shared: Arc<LoopShared>,
) -> SourceCallbacks {
    let on_frames: FrameCallback = Arc::new(move |samples: &[i16]| {
        if !run_state.is_running() {
            return CallbackAction::Stop;
        }
        handoff.publish(samples);
        CallbackAction::Continue
    });
    let on_error: ErrorCallback = Arc::new(move |error: &CaptureError| {
        shared.record_device_error(error);
    });
    SourceCallbacks::new(on_frames, on_error)
}

/// Establish a peer, retrying per `retry`.
///
/// Sleeps between attempts on `stop`, so a raised stop ends the wait early
/// with `Cancelled`.
pub fn establish_with_retry(
    transport: &mut dyn Transport,
    retry: RetryPolicy,
    stop: &StopSignal,
) -> Result<SocketAddr, TransportError> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match transport.establish(stop) {
            Ok(peer) => return Ok(peer),
            Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                log::warn!("attempt {}/{} failed: {}", attempt, attempts, e);
                if stop.wait_timeout(retry.delay()) {
                    return Err(TransportError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

/// Consumer side of a capture session, run on the `audio-forward` thread.
///
/// ```text
/// [AudioSource] → callback → [HandoffBuffer] → wait_and_take → [FrameEncoder] → [Transport]
/// ```
///
/// Owns the source and the transport for the session's lifetime; only the
/// shared counters, the run state and the stop signal are visible outside.
pub struct ForwardingLoop {
    source: Box<dyn AudioSource>,
    transport: Box<dyn Transport>,
    handoff: Arc<HandoffBuffer>,
    encoder: FrameEncoder,
    retry: RetryPolicy,
    ordering: CaptureOrdering,
    on_send_failure: SendFailurePolicy,
    run_state: Arc<AtomicRunState>,
    shared: Arc<LoopShared>,
    capturing: bool,
}

impl ForwardingLoop {
    pub fn new(
        source: Box<dyn AudioSource>,
        transport: Box<dyn Transport>,
        handoff: Arc<HandoffBuffer>,
        config: &ForwardingConfig,
        run_state: Arc<AtomicRunState>,
        shared: Arc<LoopShared>,
    ) -> Self {
        let mut encoder = FrameEncoder::new(config.framing, Instant::now(), config.max_payload_bytes());
        if let Some(limit) = config.payload_limit() {
            encoder = encoder.with_payload_limit(limit, config.format.channels);
        }
        Self {
            source,
            transport,
            handoff,
            encoder,
            retry: config.retry,
            ordering: config.ordering,
            on_send_failure: config.on_send_failure,
            run_state,
            shared,
            capturing: false,
        }
    }

    /// Drive the session until stop or a fatal error, then release
    /// everything.
    pub fn run(mut self) {
        log::info!(
            "forwarding loop started ({:?}, {:?})",
            self.transport.kind(),
            self.encoder.framing()
        );

        let outcome = self.drive();
        if let Err(reason) = &outcome {
            log::error!("forwarding failed: {}", reason);
            self.shared.fail(reason.clone());
        }
        self.finish();

        if outcome.is_err() && !self.run_state.transition(RunState::Running, RunState::Stopped) {
            self.run_state.transition(RunState::Starting, RunState::Stopped);
        }
    }

    fn is_active(&self) -> bool {
        self.run_state.is_running() && !self.shared.stop.is_raised()
    }

    fn waiting_phase(&self) -> LoopPhase {
        match self.transport.kind() {
            TransportKind::Server => LoopPhase::Listening,
            TransportKind::Client | TransportKind::Datagram => LoopPhase::Connecting,
        }
    }

    fn drive(&mut self) -> Result<(), String> {
        if !self.connect_initial()? {
            return Ok(());
        }
        self.start_capture()?;
        self.stream()
    }

    /// First establishment. Returns false when stopped before a peer came up.
    fn connect_initial(&mut self) -> Result<bool, String> {
        if !self.is_active() {
            return Ok(false);
        }
        self.shared.set_phase(self.waiting_phase());

        let first = self.transport.establish(&self.shared.stop);
        if first == Err(TransportError::Cancelled) {
            return Ok(false);
        }
        if self.ordering == CaptureOrdering::AfterFirstAttempt {
            self.start_capture()?;
            self.shared.set_phase(self.waiting_phase());
        }

        let established = match first {
            Ok(peer) => Ok(peer),
            Err(e) if self.retry.attempts <= 1 => Err(e),
            Err(e) => {
                log::warn!("attempt 1/{} failed: {}", self.retry.attempts, e);
                if self.shared.stop.wait_timeout(self.retry.delay()) {
                    return Ok(false);
                }
                let remaining = RetryPolicy {
                    attempts: self.retry.attempts - 1,
                    ..self.retry
                };
                establish_with_retry(self.transport.as_mut(), remaining, &self.shared.stop)
            }
        };

        match established {
            Ok(peer) => {
                log::info!("peer established: {}", peer);
                self.shared.set_phase(LoopPhase::PeerConnected);
                Ok(true)
            }
            Err(TransportError::Cancelled) => Ok(false),
            Err(e) => Err(format!(
                "connection failed after {} attempts: {}",
                self.retry.attempts.max(1),
                e
            )),
        }
    }

    fn start_capture(&mut self) -> Result<(), String> {
        if self.capturing {
            return Ok(());
        }
        self.shared.set_phase(LoopPhase::CaptureStarting);
        let callbacks = capture_callbacks(
            Arc::clone(&self.handoff),
            Arc::clone(&self.run_state),
            Arc::clone(&self.shared),
        );
        self.source
            .start(callbacks)
            .map_err(|e| format!("capture start failed: {}", e))?;
        self.capturing = true;
        log::info!("capture started on {}", self.source.source_info().name);
        Ok(())
    }

    fn stream(&mut self) -> Result<(), String> {
        self.shared.set_phase(LoopPhase::Streaming);
        let mut frame = AudioFrame::new(self.handoff.format());

        loop {
            match self.handoff.wait_and_take(&mut frame, None) {
                Handoff::Ready => {}
                Handoff::TimedOut => continue,
                Handoff::Stopped => return Ok(()),
            }

            if !self.transport.is_connected() && !self.reconnect() {
                return Ok(());
            }

            match self.send_frame(&frame.samples) {
                Ok(()) => self.shared.record_forwarded(),
                Err(_) if !self.is_active() => return Ok(()),
                Err(e) => match self.on_send_failure {
                    SendFailurePolicy::FailFast => return Err(format!("send failed: {}", e)),
                    SendFailurePolicy::Continue => {
                        log::warn!("send failed, re-establishing: {}", e);
                    }
                },
            }
        }
    }

    /// Encode and send one frame, as several packets when it exceeds the
    /// transport's payload limit.
    fn send_frame(&mut self, samples: &[i16]) -> Result<(), TransportError> {
        let chunk = self.encoder.chunk_len(samples.len());
        for part in samples.chunks(chunk) {
            let bytes = self.encoder.encode(part);
            self.transport.send(bytes)?;
        }
        Ok(())
    }

    /// Re-establish after a mid-stream failure while capture keeps running.
    /// Returns false once stopped.
    fn reconnect(&mut self) -> bool {
        loop {
            if !self.is_active() {
                return false;
            }
            self.shared.set_phase(self.waiting_phase());
            match establish_with_retry(self.transport.as_mut(), self.retry, &self.shared.stop) {
                Ok(peer) => {
                    log::info!("peer re-established: {}", peer);
                    self.shared.set_phase(LoopPhase::Streaming);
                    return true;
                }
                Err(TransportError::Cancelled) => return false,
                Err(e) => {
                    log::warn!("re-establish failed: {}", e);
                    if self.shared.stop.wait_timeout(self.retry.delay()) {
                        return false;
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        self.shared.set_phase(LoopPhase::Stopping);
        if self.capturing {
            self.source.stop();
            self.capturing = false;
        }
        self.handoff.shutdown();
        self.transport.close();

        let stats = self.transport.session().stats();
        let handoff = self.handoff.stats();
        log::info!(
            "forwarding stopped: {} frames forwarded, {} dropped, {} bytes sent, {} send errors",
            self.shared.frames_forwarded(),
            handoff.dropped,
            stats.bytes_sent,
            stats.send_errors
        );
        self.shared.set_phase(LoopPhase::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_frame::AudioFormat;
    use crate::models::config::BackpressurePolicy;
    use crate::transport::TcpClientTransport;
    use std::net::TcpListener;
    use std::time::Duration;

    fn handoff() -> Arc<HandoffBuffer> {
        Arc::new(HandoffBuffer::new(
            BackpressurePolicy::LatestFrame,
            AudioFormat::new(48_000, 2),
            384,
        ))
    }

    #[test]
    fn frame_callback_publishes_while_running() {
        let handoff = handoff();
        let run_state = Arc::new(AtomicRunState::new(RunState::Running));
        let callbacks = capture_callbacks(
            Arc::clone(&handoff),
            Arc::clone(&run_state),
            Arc::new(LoopShared::new()),
        );

        assert_eq!((callbacks.on_frames)(&[1, 2, 3, 4]), CallbackAction::Continue);
        let mut frame = AudioFrame::new(handoff.format());
        assert!(handoff.try_take(&mut frame));
        assert_eq!(frame.samples, vec![1, 2, 3, 4]);

        run_state.store(RunState::Stopping);
        assert_eq!((callbacks.on_frames)(&[5, 6]), CallbackAction::Stop);
        assert_eq!(handoff.stats().published, 1);
    }

    #[test]
    fn error_callback_counts_device_errors() {
        let shared = Arc::new(LoopShared::new());
        let callbacks = capture_callbacks(
            handoff(),
            Arc::new(AtomicRunState::new(RunState::Running)),
            Arc::clone(&shared),
        );

        (callbacks.on_error)(&CaptureError::Stream("xrun".into()));
        (callbacks.on_error)(&CaptureError::Device {
            code: -899,
            message: "disconnected".into(),
        });

        assert_eq!(shared.device_errors(), 2);
        assert_eq!(
            shared.last_device_error().as_deref(),
            Some("device error (code -899): disconnected")
        );
    }

    #[test]
    fn first_failure_reason_is_kept() {
        let shared = LoopShared::new();
        shared.fail("connection failed".into());
        shared.fail("later".into());
        assert_eq!(shared.failure().as_deref(), Some("connection failed"));
    }

    #[test]
    fn retry_gives_up_after_attempts() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = TcpClientTransport::new("127.0.0.1", port, Duration::from_secs(1), None);
        let retry = RetryPolicy {
            attempts: 3,
            delay_ms: 5,
        };
        let stop = StopSignal::new();

        let started = Instant::now();
        let result = establish_with_retry(&mut client, retry, &stop);
        assert_eq!(result, Err(TransportError::Refused));
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn retry_sleep_is_cut_short_by_stop() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = TcpClientTransport::new("127.0.0.1", port, Duration::from_secs(1), None);
        let retry = RetryPolicy {
            attempts: 100,
            delay_ms: 10_000,
        };
        let stop = Arc::new(StopSignal::new());
        let stopper = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                stop.raise();
            })
        };

        let started = Instant::now();
        let result = establish_with_retry(&mut client, retry, &stop);
        stopper.join().unwrap();

        assert_eq!(result, Err(TransportError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
