//! cpal microphone source.
//!
//! Opens an input device at the session's fixed format and delivers
//! interleaved i16 frames. Devices that only offer f32 are converted on the
//! audio thread into a reused scratch buffer.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};

use audio_forward_core::models::audio_frame::AudioFormat;
use audio_forward_core::models::error::CaptureError;
use audio_forward_core::processing::pcm;
use audio_forward_core::traits::audio_source::{
    AudioSource, CallbackAction, SourceCallbacks, SourceInfo,
};

use crate::device_enumerator;

struct SendStream(cpal::Stream);

// SAFETY: the stream is created in `start` and dropped in `stop`, both called
// by the session's forwarding thread; it is never touched concurrently.
unsafe impl Send for SendStream {}

/// Capture from a cpal input device.
pub struct CpalMicSource {
    device_name: Option<String>,
    buffer_frames: Option<u32>,
    resolved_name: String,
    config: Option<(StreamConfig, SampleFormat)>,
    stream: Option<SendStream>,
}

impl CpalMicSource {
    /// Capture from the host's default input device.
    pub fn default_device() -> Self {
        Self {
            device_name: None,
            buffer_frames: None,
            resolved_name: "Default Microphone".into(),
            config: None,
            stream: None,
        }
    }

    /// Capture from the input device with this name.
    pub fn with_device(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            resolved_name: name.clone(),
            device_name: Some(name),
            ..Self::default_device()
        }
    }

    /// Request a fixed number of frames per callback. Falls back to the
    /// device default when the backend refuses it.
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = Some(frames);
        self
    }
}

impl AudioSource for CpalMicSource {
    fn initialize(&mut self, format: AudioFormat) -> Result<(), CaptureError> {
        let device = device_enumerator::find_input_device(self.device_name.as_deref())?;
        if let Ok(name) = device.name() {
            self.resolved_name = name;
        }
        let selected = select_config(&device, format, self.buffer_frames)?;
        log::info!(
            "input device {:?}: {} Hz, {} channel(s), {:?}",
            self.resolved_name,
            format.sample_rate,
            format.channels,
            selected.1
        );
        self.config = Some(selected);
        Ok(())
    }

    fn start(&mut self, callbacks: SourceCallbacks) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        let (config, sample_format) = self.config.clone().ok_or(CaptureError::NotInitialized)?;
        let device = device_enumerator::find_input_device(self.device_name.as_deref())?;

        let stream = match build_stream(&device, &config, sample_format, &callbacks) {
            Err(CaptureError::UnsupportedFormat(reason))
                if matches!(config.buffer_size, BufferSize::Fixed(_)) =>
            {
                log::warn!("fixed buffer size refused ({}), using device default", reason);
                let relaxed = StreamConfig {
                    buffer_size: BufferSize::Default,
                    ..config
                };
                build_stream(&device, &relaxed, sample_format, &callbacks)?
            }
            other => other?,
        };

        stream
            .play()
            .map_err(|e| CaptureError::Stream(format!("failed to start stream: {}", e)))?;
        self.stream = Some(SendStream(stream));
        log::info!("capture stream started on {:?}", self.resolved_name);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(SendStream(stream)) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("failed to pause stream: {}", e);
            }
            log::info!("capture stream stopped on {:?}", self.resolved_name);
        }
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: self
                .device_name
                .clone()
                .unwrap_or_else(|| "default-mic".into()),
            name: self.resolved_name.clone(),
            is_default: self.device_name.is_none(),
        }
    }
}

/// Pick a stream config for `format`, preferring native i16 over f32.
fn select_config(
    device: &cpal::Device,
    format: AudioFormat,
    buffer_frames: Option<u32>,
) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    let rate = SampleRate(format.sample_rate);
    let ranges = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Stream(format!("failed to query input configs: {}", e)))?;

    let mut selected = None;
    for range in ranges {
        if range.channels() != format.channels
            || range.min_sample_rate() > rate
            || range.max_sample_rate() < rate
        {
            continue;
        }
        match range.sample_format() {
            SampleFormat::I16 => {
                selected = Some(SampleFormat::I16);
                break;
            }
            SampleFormat::F32 if selected.is_none() => selected = Some(SampleFormat::F32),
            _ => {}
        }
    }

    let sample_format = selected.ok_or_else(|| {
        CaptureError::UnsupportedFormat(format!(
            "{} Hz with {} channel(s) as i16 or f32",
            format.sample_rate, format.channels
        ))
    })?;
    let config = StreamConfig {
        channels: format.channels,
        sample_rate: rate,
        buffer_size: buffer_frames.map_or(BufferSize::Default, BufferSize::Fixed),
    };
    Ok((config, sample_format))
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    callbacks: &SourceCallbacks,
) -> Result<cpal::Stream, CaptureError> {
    let on_error = Arc::clone(&callbacks.on_error);
    let err_fn = move |err: cpal::StreamError| {
        let error = map_stream_error(err);
        log::error!("cpal input error: {}", error);
        on_error(&error);
    };
    let on_frames = Arc::clone(&callbacks.on_frames);
    // Once the consumer asks to stop, later buffers are ignored until the
    // stream is dropped.
    let mut stopped = false;

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if !stopped && on_frames(data) == CallbackAction::Stop {
                    stopped = true;
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => {
            let mut scratch: Vec<i16> = Vec::with_capacity(match config.buffer_size {
                BufferSize::Fixed(frames) => frames as usize * config.channels as usize,
                BufferSize::Default => 4096,
            });
            device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if stopped {
                        return;
                    }
                    pcm::f32_to_i16_into(data, &mut scratch);
                    if on_frames(&scratch) == CallbackAction::Stop {
                        stopped = true;
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(CaptureError::UnsupportedFormat(format!(
                "sample format {:?}",
                other
            )))
        }
    };
    stream.map_err(map_build_error)
}

fn map_stream_error(err: cpal::StreamError) -> CaptureError {
    match err {
        cpal::StreamError::DeviceNotAvailable => CaptureError::DeviceNotAvailable,
        other => CaptureError::Stream(other.to_string()),
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceNotAvailable,
        cpal::BuildStreamError::StreamConfigNotSupported => {
            CaptureError::UnsupportedFormat("stream config not supported".into())
        }
        other => CaptureError::Stream(other.to_string()),
    }
}
