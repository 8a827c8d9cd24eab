//! Capture and playback seams used by the streaming loops
//!
//! The loops only see these traits. Device-backed implementations live in
//! [`capture`](super::capture) and [`playback`](super::playback); the
//! synthetic ones here drive the child without a microphone and the parent
//! without speakers.

use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::buffer::AudioFrame;
use crate::error::AudioError;

/// Blocking source of fixed-format mono frames
pub trait CaptureSource: Send {
    /// Block until the next frame is available
    fn read_frame(&mut self) -> Result<AudioFrame, AudioError>;
}

/// Blocking sink for decoded samples
pub trait PlaybackSink: Send {
    fn write_frame(&mut self, samples: &[i16]) -> Result<(), AudioError>;
}

/// Fire-and-forget disconnect cue
pub trait AlertSignal: Send + Sync {
    fn play_alert(&self);
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn read_frame(&mut self) -> Result<AudioFrame, AudioError> {
        (**self).read_frame()
    }
}

impl<T: PlaybackSink + ?Sized> PlaybackSink for Box<T> {
    fn write_frame(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        (**self).write_frame(samples)
    }
}

impl<F: Fn() + Send + Sync> AlertSignal for F {
    fn play_alert(&self) {
        self()
    }
}

/// Sine generator standing in for a microphone
pub struct ToneCapture {
    frequency: f64,
    amplitude: f64,
    sample_rate: u32,
    frame_samples: usize,
    phase: f64,
    sequence: u32,
    remaining: Option<u32>,
    paced: bool,
    next_deadline: Option<Instant>,
}

impl ToneCapture {
    pub fn new(frequency: f64, amplitude: i16, sample_rate: u32, frame_samples: usize) -> Self {
        Self {
            frequency,
            amplitude: amplitude as f64,
            sample_rate,
            frame_samples,
            phase: 0.0,
            sequence: 0,
            remaining: None,
            paced: false,
            next_deadline: None,
        }
    }

    /// Deliver frames no faster than real time
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Stop with [`AudioError::CaptureEnded`] after `frames` frames
    pub fn limit(mut self, frames: u32) -> Self {
        self.remaining = Some(frames);
        self
    }

    fn wait_for_deadline(&mut self) {
        let frame_duration =
            Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate as u64);
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + frame_duration);
    }
}

impl CaptureSource for ToneCapture {
    fn read_frame(&mut self) -> Result<AudioFrame, AudioError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(AudioError::CaptureEnded);
            }
            *remaining -= 1;
        }
        if self.paced {
            self.wait_for_deadline();
        }

        let step = TAU * self.frequency / self.sample_rate as f64;
        let samples = (0..self.frame_samples)
            .map(|_| {
                let value = (self.phase.sin() * self.amplitude).round() as i16;
                self.phase = (self.phase + step) % TAU;
                value
            })
            .collect();

        let frame = AudioFrame::new(samples, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}

/// Playback sink that discards audio
#[derive(Default)]
pub struct NullPlayback {
    samples_written: u64,
}

impl NullPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl PlaybackSink for NullPlayback {
    fn write_frame(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        self.samples_written += samples.len() as u64;
        Ok(())
    }
}

/// Alert that only logs, for headless runs
pub struct LogAlert;

impl AlertSignal for LogAlert {
    fn play_alert(&self) {
        tracing::warn!("Child device disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tone_limit() {
        let mut tone = ToneCapture::new(440.0, 8000, 8000, 100).limit(2);
        assert_eq!(tone.read_frame().unwrap().sequence, 0);
        assert_eq!(tone.read_frame().unwrap().sequence, 1);
        assert!(matches!(tone.read_frame(), Err(AudioError::CaptureEnded)));
    }

    #[test]
    fn test_tone_shape() {
        let mut tone = ToneCapture::new(1000.0, 10_000, 8000, 8);
        let frame = tone.read_frame().unwrap();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.samples[0], 0);
        assert_eq!(frame.samples[2], 10_000);
        assert_eq!(frame.samples[6], -10_000);
    }

    #[test]
    fn test_closure_alert() {
        let count = Arc::new(AtomicUsize::new(0));
        let alert: Box<dyn AlertSignal> = {
            let count = count.clone();
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        alert.play_alert();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
