//! Speaker playback through cpal
//!
//! `write_frame` pushes decoded mono samples into a [`SampleRing`]; the output
//! callback drains it into every channel of the device and plays silence on
//! underrun.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{SampleRing, SharedSampleRing};
use crate::audio::device::{output_device, stream_channels};
use crate::audio::sink::PlaybackSink;
use crate::error::AudioError;

/// Longest a writer waits for ring space before dropping samples
const MAX_WRITE_WAIT: Duration = Duration::from_millis(250);

/// Live speaker as a [`PlaybackSink`]
pub struct SpeakerPlayback {
    ring: SharedSampleRing,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SpeakerPlayback {
    /// Open the named output device (or the default one) and start playing
    ///
    /// `buffer_samples` bounds playback latency.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        buffer_samples: usize,
    ) -> Result<Self, AudioError> {
        let device = output_device(device_name)?;
        let device_label = device.name.clone();

        let channels = stream_channels(&device_label, &device.default_output_config()?)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring: SharedSampleRing = Arc::new(SampleRing::new(buffer_samples));
        let ring_for_callback = ring.clone();
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        upmix(data, channels as usize, || ring_for_callback.pop());
                    },
                    move |err| {
                        tracing::error!("Playback stream error: {}", err);
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
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("playback thread exited".to_string()))??;

        tracing::info!(
            "Playback started on {} ({} Hz, mono to {} ch)",
            device_label,
            sample_rate,
            channels
        );

        Ok(Self {
            ring,
            running,
            thread_handle: Some(handle),
        })
    }

    /// Samples dropped because the device fell behind
    pub fn overflow_count(&self) -> usize {
        self.ring.overflow_count()
    }

    /// Stop playing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl PlaybackSink for SpeakerPlayback {
    fn write_frame(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::StreamError("playback stopped".to_string()));
        }
        // Block like a hardware write until the device has room.
        let deadline = Instant::now() + MAX_WRITE_WAIT;
        let wanted = samples.len().min(self.ring.capacity());
        while self.ring.available() < wanted && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        let dropped = self.ring.push_slice(samples);
        if dropped > 0 {
            tracing::debug!("Playback ring full, dropped {} samples", dropped);
        }
        Ok(())
    }
}

impl Drop for SpeakerPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Copy each mono sample from `next` into every channel of an interleaved frame
fn upmix(out: &mut [f32], channels: usize, mut next: impl FnMut() -> Option<i16>) {
    for frame in out.chunks_mut(channels.max(1)) {
        let value = next().map(|s| s as f32 / i16::MAX as f32).unwrap_or(0.0);
        frame.fill(value);
    }
}
