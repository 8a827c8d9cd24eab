//! Child-side streaming loop: capture, encode, write

use std::io::Write;

use crate::audio::sink::CaptureSource;
use crate::codec::UlawEncoder;
use crate::error::{AudioError, Error, NetworkError};
use crate::network::token::CancelFlag;

/// How a send loop ended
#[derive(Debug)]
pub enum SendOutcome {
    /// Stop was requested
    Cancelled,
    /// The capture source ran dry
    CaptureEnded,
    /// Capture or the peer connection failed
    Failed(Error),
}

/// Streams one frame of µ-law bytes per captured frame, with no framing
pub struct AudioSendLoop<C: CaptureSource> {
    capture: C,
    encoder: UlawEncoder,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<C: CaptureSource> AudioSendLoop<C> {
    pub fn new(capture: C, frame_samples: usize) -> Self {
        Self {
            capture,
            encoder: UlawEncoder::new(frame_samples),
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Run until cancelled, capture ends, or a write fails
    pub fn run<W: Write>(&mut self, out: &mut W, cancel: &CancelFlag) -> SendOutcome {
        loop {
            if cancel.is_cancelled() {
                return SendOutcome::Cancelled;
            }

            let frame = match self.capture.read_frame() {
                Ok(frame) => frame,
                Err(AudioError::CaptureEnded) => return SendOutcome::CaptureEnded,
                Err(e) => return SendOutcome::Failed(e.into()),
            };
            if cancel.is_cancelled() {
                return SendOutcome::Cancelled;
            }

            let encoded = self.encoder.encode(&frame.samples);
            let len = encoded.len();
            if let Err(e) = out.write_all(encoded) {
                if cancel.is_cancelled() {
                    return SendOutcome::Cancelled;
                }
                return SendOutcome::Failed(NetworkError::SendFailed(e).into());
            }

            self.frames_sent += 1;
            self.bytes_sent += len as u64;
            if self.frames_sent % 1000 == 0 {
                let stats = self.encoder.stats();
                tracing::debug!(
                    "Stats: {} frames encoded, {:.1} KB sent, avg frame {:.0} bytes",
                    stats.frames_encoded,
                    self.bytes_sent as f64 / 1024.0,
                    stats.average_frame_size
                );
            }
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}
