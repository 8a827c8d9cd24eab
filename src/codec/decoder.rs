//! μ-law decoder wrapper

use super::ulaw;

/// Chunk decoder for the receive path
///
/// Input chunks are whatever a socket read returned; there is no framing, so
/// every byte is one sample.
pub struct UlawDecoder {
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    /// Chunks decoded
    chunks_decoded: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl UlawDecoder {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            decode_buffer: vec![0i16; max_chunk],
            chunks_decoded: 0,
            samples_produced: 0,
        }
    }

    /// Decode a chunk of μ-law bytes into linear samples
    pub fn decode(&mut self, data: &[u8]) -> &[i16] {
        if data.len() > self.decode_buffer.len() {
            self.decode_buffer.resize(data.len(), 0);
        }
        let samples = ulaw::decode(data, &mut self.decode_buffer);

        self.chunks_decoded += 1;
        self.samples_produced += samples as u64;

        &self.decode_buffer[..samples]
    }

    /// Chunks decoded so far
    pub fn chunks_decoded(&self) -> u64 {
        self.chunks_decoded
    }

    /// Samples produced so far
    pub fn samples_produced(&self) -> u64 {
        self.samples_produced
    }
}
