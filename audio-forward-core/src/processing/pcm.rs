//! PCM sample conversions used on both sides of the handoff.

/// Convert f32 samples `[-1.0, 1.0]` to i16, reusing `out`'s allocation.
///
/// Clamps out-of-range values.
pub fn f32_to_i16_into(samples: &[f32], out: &mut Vec<i16>) {
    out.clear();
    out.extend(samples.iter().map(|&sample| {
        let clamped = sample.clamp(-1.0, 1.0);
        (clamped * i16::MAX as f32) as i16
    }));
}

/// Append i16 samples to `out` as little-endian bytes.
///
/// Output grows by `samples.len() * 2` bytes.
pub fn extend_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Decode little-endian bytes back to i16 samples. A trailing odd byte is ignored.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_conversion_clamps() {
        let mut out = Vec::new();
        f32_to_i16_into(&[0.0, 1.0, -1.0, 2.0, -3.0], &mut out);
        assert_eq!(out, vec![0, i16::MAX, -i16::MAX, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn float_conversion_reuses_buffer() {
        let mut out = vec![9; 8];
        f32_to_i16_into(&[0.5], &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], (0.5 * i16::MAX as f32) as i16);
    }

    #[test]
    fn le_encoding() {
        let mut out = vec![0xFF];
        extend_le_bytes(&[1, -2, 0x1234], &mut out);
        assert_eq!(out, vec![0xFF, 0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(le_bytes_to_i16(&out[1..]), vec![1, -2, 0x1234]);
    }
}
