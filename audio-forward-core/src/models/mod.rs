pub mod audio_frame;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod state;
