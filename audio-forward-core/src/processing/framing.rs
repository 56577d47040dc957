//! Wire framing for outgoing audio.
//!
//! Raw mode sends the PCM payload as-is. Packet mode prefixes every payload
//! with an 8-byte header:
//!
//! ```text
//! [0-3]  payload length in bytes (u32 LE)
//! [4-7]  timestamp, ms since session start (u32 LE, wrapping)
//! [8..]  raw 16-bit LE PCM payload
//! ```

use std::time::Instant;

use crate::models::config::Framing;
use crate::processing::pcm;

/// Size of the packet header in bytes.
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub payload_len: u32,
    pub timestamp_ms: u32,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&self.payload_len.to_le_bytes());
        header[4..8].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        header
    }

    /// Parse a header from the first 8 bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            payload_len: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            timestamp_ms: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

/// Turns frames into wire bytes, reusing one scratch buffer.
pub struct FrameEncoder {
    framing: Framing,
    epoch: Instant,
    max_samples: Option<usize>,
    scratch: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(framing: Framing, epoch: Instant, capacity: usize) -> Self {
        Self {
            framing,
            epoch,
            max_samples: None,
            scratch: Vec::with_capacity(capacity + HEADER_LEN),
        }
    }

    /// Cap each packet at `max_payload` bytes of PCM, split on whole frames
    /// of `channels` samples.
    pub fn with_payload_limit(mut self, max_payload: usize, channels: u16) -> Self {
        let channels = usize::from(channels.max(1));
        let frames = (max_payload / 2 / channels).max(1);
        self.max_samples = Some(frames * channels);
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Samples per packet for a frame of `total` samples. Never zero.
    pub fn chunk_len(&self, total: usize) -> usize {
        match self.max_samples {
            Some(max) if total > max => max,
            _ => total.max(1),
        }
    }

    /// Encode `samples` stamped with the time elapsed since the epoch.
    pub fn encode(&mut self, samples: &[i16]) -> &[u8] {
        let timestamp_ms = self.epoch.elapsed().as_millis() as u32;
        self.encode_at(samples, timestamp_ms)
    }

    pub fn encode_at(&mut self, samples: &[i16], timestamp_ms: u32) -> &[u8] {
        self.scratch.clear();
        if self.framing == Framing::Packet {
            let header = PacketHeader {
                payload_len: (samples.len() * 2) as u32,
                timestamp_ms,
            };
            self.scratch.extend_from_slice(&header.encode());
        }
        pcm::extend_le_bytes(samples, &mut self.scratch);
        &self.scratch
    }
}
