//! # audio-forward-cpal
//!
//! Cross-platform capture backend for audio-forward, built on cpal.
//!
//! Provides:
//! - `CpalMicSource`: input-device capture delivering i16 frames
//! - `list_input_devices`: input device enumeration on the default host
//!
//! ## Usage
//! ```ignore
//! use audio_forward_core::{ForwardingConfig, SessionController};
//! use audio_forward_cpal::CpalMicSource;
//!
//! let controller = SessionController::new();
//! let mic = CpalMicSource::default_device().with_buffer_frames(192);
//! controller.start(ForwardingConfig::server(28200), Box::new(mic))?;
//! ```

pub mod cpal_mic;
pub mod device_enumerator;

pub use cpal_mic::CpalMicSource;
pub use device_enumerator::{default_input_device_name, list_input_devices};
