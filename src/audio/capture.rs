//! Microphone capture through cpal
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! host). The stream opens with the device's own channel count; the data
//! callback downmixes to 16-bit mono and hands chunks to
//! [`MicCapture::read_frame`] over a bounded channel.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::audio::device::{input_device, stream_channels};
use crate::audio::sink::CaptureSource;
use crate::error::AudioError;

/// Chunks buffered between the callback and the reader
const CHUNK_QUEUE: usize = 64;

/// Live microphone as a [`CaptureSource`]
pub struct MicCapture {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    chunk_rx: Receiver<Vec<i16>>,
    error_rx: Receiver<AudioError>,
    pending: Vec<i16>,
    frame_samples: usize,
    sequence: u32,
}

impl MicCapture {
    /// Open the named input device (or the default one) and start recording
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        frame_samples: usize,
    ) -> Result<Self, AudioError> {
        let device = input_device(device_name)?;
        let device_label = device.name.clone();

        let channels = stream_channels(&device_label, &device.default_input_config()?)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(CHUNK_QUEUE);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let chunk = downmix(data, channels as usize);
                        // Dropped on overflow; the reader is behind anyway.
                        let _ = chunk_tx.try_send(chunk);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("capture thread exited".to_string()))?;
        ready?;

        tracing::info!(
            "Microphone capture started on {} ({} Hz, {} ch to mono, {} samples/frame)",
            device_label,
            sample_rate,
            channels,
            frame_samples
        );

        Ok(Self {
            running,
            thread_handle: Some(handle),
            chunk_rx,
            error_rx,
            pending: Vec::with_capacity(frame_samples * 2),
            frame_samples,
            sequence: 0,
        })
    }

    /// Stop recording
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl CaptureSource for MicCapture {
    fn read_frame(&mut self) -> Result<AudioFrame, AudioError> {
        while self.pending.len() < self.frame_samples {
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err);
            }
            match self.chunk_rx.recv_timeout(Duration::from_secs(1)) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!("No microphone data for 1s");
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::CaptureEnded),
            }
        }

        let samples: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
        let frame = AudioFrame::new(samples, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Average interleaved frames down to one 16-bit channel
fn downmix(data: &[f32], channels: usize) -> Vec<i16> {
    data.chunks(channels.max(1))
        .map(|frame| f32_to_i16(frame.iter().sum::<f32>() / frame.len() as f32))
        .collect()
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
