//! Built-in audio sources that need no capture hardware.

pub mod manual;
pub mod tone;

pub use manual::{ManualSource, ManualSourceHandle};
pub use tone::ToneSource;
