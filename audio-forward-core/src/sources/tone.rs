//! Synthetic sine-wave source.
//!
//! Generates a tone on its own thread, paced at the sample rate, so the
//! forwarding pipeline can run without capture hardware.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::audio_frame::AudioFormat;
use crate::models::error::CaptureError;
use crate::processing::pcm;
use crate::traits::audio_source::{AudioSource, CallbackAction, SourceCallbacks, SourceInfo};

/// Sine generator delivering `frames_per_callback` frames per callback.
pub struct ToneSource {
    frequency_hz: f32,
    amplitude: f32,
    frames_per_callback: usize,
    format: Option<AudioFormat>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ToneSource {
    pub fn new(frequency_hz: f32, frames_per_callback: usize) -> Self {
        Self {
            frequency_hz,
            amplitude: 0.25,
            frames_per_callback: frames_per_callback.max(1),
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Peak amplitude in 0.0..=1.0 of full scale.
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }
}

impl AudioSource for ToneSource {
    fn initialize(&mut self, format: AudioFormat) -> Result<(), CaptureError> {
        format.validate().map_err(CaptureError::UnsupportedFormat)?;
        self.format = Some(format);
        Ok(())
    }

    fn start(&mut self, callbacks: SourceCallbacks) -> Result<(), CaptureError> {
        let format = self.format.ok_or(CaptureError::NotInitialized)?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let mut oscillator = Oscillator::new(self.frequency_hz, self.amplitude, format);
        let frames = self.frames_per_callback;
        let period = Duration::from_secs_f64(frames as f64 / format.sample_rate as f64);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("tone-source".into())
            .spawn(move || {
                let mut samples = Vec::with_capacity(frames * format.channels as usize);
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    oscillator.fill(frames, &mut samples);
                    if (callbacks.on_frames)(&samples) == CallbackAction::Stop {
                        break;
                    }
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                running.store(false, Ordering::SeqCst);
                log::debug!("tone source thread exiting");
            });

        match handle {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CaptureError::Stream(format!("failed to spawn tone thread: {}", e)))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: "tone".into(),
            name: format!("Tone {} Hz", self.frequency_hz),
            is_default: false,
        }
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Oscillator {
    phase: f32,
    step: f32,
    amplitude: f32,
    channels: usize,
    scratch: Vec<f32>,
}

impl Oscillator {
    fn new(frequency_hz: f32, amplitude: f32, format: AudioFormat) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency_hz / format.sample_rate as f32,
            amplitude,
            channels: format.channels as usize,
            scratch: Vec::new(),
        }
    }

    /// Replace `out` with `frames` interleaved frames, the same value on
    /// every channel.
    fn fill(&mut self, frames: usize, out: &mut Vec<i16>) {
        self.scratch.clear();
        for _ in 0..frames {
            let value = self.phase.sin() * self.amplitude;
            self.phase = (self.phase + self.step) % TAU;
            for _ in 0..self.channels {
                self.scratch.push(value);
            }
        }
        pcm::f32_to_i16_into(&self.scratch, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn start_requires_initialize() {
        let mut tone = ToneSource::new(440.0, 192);
        let callbacks = SourceCallbacks::new(
            Arc::new(|_: &[i16]| CallbackAction::Continue),
            Arc::new(|_: &CaptureError| {}),
        );
        assert_eq!(tone.start(callbacks), Err(CaptureError::NotInitialized));
    }

    #[test]
    fn delivers_fixed_size_stereo_frames() {
        let mut tone = ToneSource::new(440.0, 192);
        tone.initialize(AudioFormat::new(48_000, 2)).unwrap();

        let received: Arc<Mutex<Vec<Vec<i16>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let callbacks = SourceCallbacks::new(
            Arc::new(move |samples: &[i16]| {
                let mut frames = sink.lock();
                frames.push(samples.to_vec());
                if frames.len() >= 3 {
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }),
            Arc::new(|_: &CaptureError| {}),
        );
        tone.start(callbacks).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while received.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        tone.stop();

        let frames = received.lock();
        assert_eq!(frames.len(), 3);
        for frame in frames.iter() {
            assert_eq!(frame.len(), 384);
            // Both channels carry the same sample.
            assert!(frame.chunks(2).all(|pair| pair[0] == pair[1]));
        }
        assert!(frames.iter().flatten().any(|&s| s != 0));
        assert!(frames.iter().flatten().all(|&s| s.unsigned_abs() <= 8_200));
    }

    #[test]
    fn amplitude_is_clamped_to_full_scale() {
        assert_eq!(ToneSource::new(440.0, 192).amplitude, 0.25);
        assert_eq!(ToneSource::new(440.0, 192).with_amplitude(0.1).amplitude, 0.1);
        assert_eq!(ToneSource::new(440.0, 192).with_amplitude(3.0).amplitude, 1.0);
        assert_eq!(ToneSource::new(440.0, 192).with_amplitude(-1.0).amplitude, 0.0);
    }

    #[test]
    fn oscillator_stays_in_amplitude() {
        let mut osc = Oscillator::new(1_000.0, 0.5, AudioFormat::new(8_000, 1));
        let mut out = Vec::new();
        osc.fill(64, &mut out);
        assert_eq!(out.len(), 64);
        assert_eq!(out[0], 0);
        assert!(out.iter().all(|&s| s.unsigned_abs() <= 16_384));
        assert!(out.iter().any(|&s| s > 10_000));
    }
}
