//! μ-law encoder wrapper
//!
//! Reuses one output buffer across frames so the capture path does not
//! allocate per frame.

use super::ulaw;

/// Frame encoder for the transport stream
pub struct UlawEncoder {
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl UlawEncoder {
    /// Create an encoder sized for frames of `frame_samples` samples
    pub fn new(frame_samples: usize) -> Self {
        Self {
            encode_buffer: vec![0u8; frame_samples],
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode linear samples, returning the encoded bytes.
    ///
    /// Frames larger than the current buffer grow it; any length is accepted.
    pub fn encode(&mut self, samples: &[i16]) -> &[u8] {
        if samples.len() > self.encode_buffer.len() {
            self.encode_buffer.resize(samples.len(), 0);
        }
        let size = ulaw::encode(samples, &mut self.encode_buffer);

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        &self.encode_buffer[..size]
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
