use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::audio_frame::AudioFormat;
use crate::models::error::CaptureError;
use crate::traits::audio_source::{AudioSource, CallbackAction, SourceCallbacks, SourceInfo};

#[derive(Default)]
struct ManualState {
    format: Option<AudioFormat>,
    callbacks: Option<SourceCallbacks>,
    starts: u32,
}

struct ManualShared {
    state: Mutex<ManualState>,
    started: Condvar,
}

/// Source fed by the caller instead of a device.
///
/// Frames pushed through the [`ManualSourceHandle`] are delivered to the
/// registered frame callback on the pushing thread, the way a device thread
/// would deliver them.
pub struct ManualSource {
    shared: Arc<ManualShared>,
    init_error: Option<CaptureError>,
}

/// Cloneable feeder for a [`ManualSource`].
#[derive(Clone)]
pub struct ManualSourceHandle {
    shared: Arc<ManualShared>,
}

impl ManualSource {
    pub fn new() -> (Self, ManualSourceHandle) {
        let shared = Arc::new(ManualShared {
            state: Mutex::new(ManualState::default()),
            started: Condvar::new(),
        });
        let handle = ManualSourceHandle {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                shared,
                init_error: None,
            },
            handle,
        )
    }

    /// A source whose `initialize` fails with `error`.
    pub fn failing(error: CaptureError) -> Self {
        let (mut source, _) = Self::new();
        source.init_error = Some(error);
        source
    }
}

impl AudioSource for ManualSource {
    fn initialize(&mut self, format: AudioFormat) -> Result<(), CaptureError> {
        if let Some(error) = &self.init_error {
            return Err(error.clone());
        }
        self.shared.state.lock().format = Some(format);
        Ok(())
    }

    fn start(&mut self, callbacks: SourceCallbacks) -> Result<(), CaptureError> {
        {
            let mut state = self.shared.state.lock();
            if state.format.is_none() {
                return Err(CaptureError::NotInitialized);
            }
            if state.callbacks.is_some() {
                return Err(CaptureError::AlreadyRunning);
            }
            state.callbacks = Some(callbacks);
            state.starts += 1;
        }
        self.shared.started.notify_all();
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.state.lock().callbacks = None;
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: "manual".into(),
            name: "Manual Source".into(),
            is_default: false,
        }
    }
}

impl ManualSourceHandle {
    /// Deliver `samples` to the frame callback.
    ///
    /// Returns false when the source is not started or the callback asked to
    /// stop; in the latter case the source stops itself.
    pub fn push(&self, samples: &[i16]) -> bool {
        let Some(on_frames) = self
            .shared
            .state
            .lock()
            .callbacks
            .as_ref()
            .map(|c| Arc::clone(&c.on_frames))
        else {
            return false;
        };

        match on_frames(samples) {
            CallbackAction::Continue => true,
            CallbackAction::Stop => {
                self.shared.state.lock().callbacks = None;
                false
            }
        }
    }

    /// Report a device error through the error callback.
    pub fn inject_error(&self, error: CaptureError) {
        let on_error = self
            .shared
            .state
            .lock()
            .callbacks
            .as_ref()
            .map(|c| Arc::clone(&c.on_error));
        if let Some(on_error) = on_error {
            on_error(&error);
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().callbacks.is_some()
    }

    /// Number of times the source has been started.
    pub fn start_count(&self) -> u32 {
        self.shared.state.lock().starts
    }

    /// Block until the source is started or `timeout` elapses.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.callbacks.is_none() {
            if self.shared.started.wait_until(&mut state, deadline).timed_out() {
                return state.callbacks.is_some();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callbacks(count: Arc<AtomicUsize>, stop_after: usize) -> SourceCallbacks {
        SourceCallbacks::new(
            Arc::new(move |samples: &[i16]| {
                let seen = count.fetch_add(samples.len(), Ordering::SeqCst) + samples.len();
                if seen >= stop_after {
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }),
            Arc::new(|_: &CaptureError| {}),
        )
    }

    #[test]
    fn start_requires_initialize() {
        let (mut source, _handle) = ManualSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        assert_eq!(
            source.start(counting_callbacks(count, usize::MAX)).unwrap_err(),
            CaptureError::NotInitialized
        );
    }

    #[test]
    fn push_delivers_until_callback_stops() {
        let (mut source, handle) = ManualSource::new();
        assert!(!handle.push(&[1, 2]));

        source.initialize(AudioFormat::default()).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        source
            .start(counting_callbacks(Arc::clone(&count), 4))
            .unwrap();
        assert!(handle.wait_started(Duration::from_millis(10)));

        assert!(handle.push(&[1, 2]));
        assert!(!handle.push(&[3, 4]));
        assert!(!handle.is_started());
        assert!(!handle.push(&[5, 6]));
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(handle.start_count(), 1);
    }

    #[test]
    fn failing_source_reports_error() {
        let mut source = ManualSource::failing(CaptureError::DeviceNotAvailable);
        assert_eq!(
            source.initialize(AudioFormat::default()),
            Err(CaptureError::DeviceNotAvailable)
        );
    }
}
