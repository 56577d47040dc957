use std::sync::Arc;

use crate::models::audio_frame::AudioFormat;
use crate::models::error::CaptureError;

/// Return value of a frame callback: keep delivering or stop the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Callback invoked on the real-time audio thread with interleaved i16 samples.
///
/// The slice is only valid for the duration of the call. Implementations of
/// the callback must not block on I/O or contended locks.
pub type FrameCallback = Arc<dyn Fn(&[i16]) -> CallbackAction + Send + Sync + 'static>;

/// Callback invoked when the device reports an error.
pub type ErrorCallback = Arc<dyn Fn(&CaptureError) + Send + Sync + 'static>;

/// The pair of callbacks registered with a source on start.
#[derive(Clone)]
pub struct SourceCallbacks {
    pub on_frames: FrameCallback,
    pub on_error: ErrorCallback,
}

impl SourceCallbacks {
    pub fn new(on_frames: FrameCallback, on_error: ErrorCallback) -> Self {
        Self {
            on_frames,
            on_error,
        }
    }
}

/// Descriptive information about the device behind a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Capability interface for a capture device.
///
/// Implemented by:
/// - `CpalMicSource` (audio-forward-cpal)
/// - `ManualSource`, `ToneSource` (this crate)
pub trait AudioSource: Send {
    /// Open the device for the given fixed format.
    fn initialize(&mut self, format: AudioFormat) -> Result<(), CaptureError>;

    /// Start delivering frames through `callbacks`.
    ///
    /// Frames arrive on a thread owned by the source.
    fn start(&mut self, callbacks: SourceCallbacks) -> Result<(), CaptureError>;

    /// Stop delivering frames and release the stream.
    fn stop(&mut self);

    fn source_info(&self) -> SourceInfo;
}
