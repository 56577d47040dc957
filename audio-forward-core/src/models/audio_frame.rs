use serde::{Deserialize, Serialize};

/// Fixed PCM format of a forwarding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Bytes per interleaved frame (all channels, 16-bit).
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

/// One capture callback worth of interleaved signed 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub format: AudioFormat,
}

impl AudioFrame {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            samples: Vec::new(),
            format,
        }
    }

    pub fn with_samples(samples: Vec<i16>, format: AudioFormat) -> Self {
        Self { samples, format }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of interleaved frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_frame_sizes() {
        let frame = AudioFrame::with_samples(vec![0; 192 * 2], AudioFormat::new(48_000, 2));
        assert_eq!(frame.frame_count(), 192);
        assert_eq!(frame.sample_count(), 384);
        assert_eq!(frame.byte_len(), 192 * 2 * 2);
    }

    #[test]
    fn format_validation() {
        assert!(AudioFormat::default().validate().is_ok());
        assert!(AudioFormat::new(16_000, 1).validate().is_ok());
        assert!(AudioFormat::new(1_000, 2).validate().is_err());
        assert!(AudioFormat::new(48_000, 6).validate().is_err());
        assert_eq!(AudioFormat::new(48_000, 2).bytes_per_frame(), 4);
    }
}
