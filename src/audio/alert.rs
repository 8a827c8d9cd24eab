//! Audible disconnect cue
//!
//! Three short beeps rising by fifths, synthesized and played on a detached
//! thread so the caller never waits for the device.

use cpal::traits::{DeviceTrait, StreamTrait};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::device::output_device;
use crate::audio::sink::AlertSignal;
use crate::error::AudioError;

const BEEP_FREQUENCIES: [f32; 3] = [523.25, 783.99, 1174.66];
const BEEP_MS: u32 = 140;
const GAP_MS: u32 = 40;
const BEEP_GAIN: f32 = 0.4;

/// Alert played on the default (or named) output device
pub struct ToneAlert {
    device_name: Option<String>,
}

impl ToneAlert {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl AlertSignal for ToneAlert {
    fn play_alert(&self) {
        let device_name = self.device_name.clone();
        let spawned = thread::Builder::new()
            .name("alert".to_string())
            .spawn(move || {
                if let Err(e) = play_cue(device_name.as_deref()) {
                    tracing::error!("Failed to play alert: {}", e);
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn alert thread: {}", e);
        }
    }
}

/// Render the cue as mono samples at `sample_rate`
pub fn cue_samples(sample_rate: u32) -> Vec<f32> {
    let per_ms = sample_rate as f32 / 1000.0;
    let beep_len = (BEEP_MS as f32 * per_ms) as usize;
    let gap_len = (GAP_MS as f32 * per_ms) as usize;
    let mut samples = Vec::with_capacity(BEEP_FREQUENCIES.len() * (beep_len + gap_len));

    for frequency in BEEP_FREQUENCIES {
        for n in 0..beep_len {
            let t = n as f32 / sample_rate as f32;
            // Short linear fade at both ends avoids clicks
            let fade = (n.min(beep_len - n) as f32 / (per_ms * 5.0)).min(1.0);
            samples.push((TAU * frequency * t).sin() * BEEP_GAIN * fade);
        }
        samples.extend(std::iter::repeat(0.0).take(gap_len));
    }
    samples
}

fn play_cue(device_name: Option<&str>) -> Result<(), AudioError> {
    let device = output_device(device_name)?;
    let supported = device.default_output_config()?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = supported.config();

    let cue = Arc::new(cue_samples(sample_rate));
    let position = Arc::new(AtomicUsize::new(0));
    let duration = Duration::from_millis(
        (cue.len() as u64 * 1000) / sample_rate as u64 + 100,
    );

    let cue_for_callback = cue.clone();
    let stream = device.inner().build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels.max(1)) {
                let index = position.fetch_add(1, Ordering::Relaxed);
                let value = cue_for_callback.get(index).copied().unwrap_or(0.0);
                frame.iter_mut().for_each(|s| *s = value);
            }
        },
        move |err| {
            tracing::error!("Alert stream error: {}", err);
        },
        None,
    )?;
    stream.play()?;
    tracing::info!("Playing alert");
    thread::sleep(duration);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cue_length_and_level() {
        let samples = cue_samples(8000);
        // 3 × (140 + 40) ms at 8 samples/ms
        assert_eq!(samples.len(), 3 * (1120 + 320));
        assert!(samples.iter().all(|s| s.abs() <= BEEP_GAIN));
        assert!(samples.iter().any(|s| s.abs() > BEEP_GAIN * 0.9));
    }
}
