//! G.711 μ-law codec
//!
//! Converts 16-bit linear PCM to one byte per sample for transport and back.
//! The mapping is fixed and carries no state between frames, so any byte
//! offset in the stream decodes on its own.

pub mod decoder;
pub mod encoder;
pub mod ulaw;

pub use decoder::UlawDecoder;
pub use encoder::UlawEncoder;
pub use ulaw::{decode, decode_sample, encode, encode_sample};
