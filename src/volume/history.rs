//! Rolling loudness history with auto-scaling peak
//!
//! The receive thread appends one loudness value per decoded chunk while the
//! render context copies out the most recent values. Both sides take the same
//! mutex; the render side holds it only long enough to copy.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Reference scale applied to samples before the exponent
pub const SAMPLE_SCALE: f64 = 1.0 / 128.0;

/// Initial peak before any audio is seen
pub const DEFAULT_FLOOR: f64 = 0.25;

/// Default exponent: mean square loudness
pub const DEFAULT_EXPONENT: f64 = 2.0;

struct HistoryState {
    samples: VecDeque<f64>,
    max_volume: f64,
    volume_norm: f64,
}

/// Shared, thread-safe volume history
///
/// Cloning yields another handle to the same history.
#[derive(Clone)]
pub struct VolumeHistory {
    state: Arc<Mutex<HistoryState>>,
    capacity: usize,
    exponent: f64,
}

impl VolumeHistory {
    /// Create a history holding at most `capacity` values, mean-square loudness
    pub fn new(capacity: usize) -> Self {
        Self::with_params(capacity, DEFAULT_EXPONENT, DEFAULT_FLOOR)
    }

    /// Create a history with an explicit perceptual exponent and seeded floor
    ///
    /// `floor` must be positive; it is the peak until louder audio arrives.
    pub fn with_params(capacity: usize, exponent: f64, floor: f64) -> Self {
        let floor = if floor > 0.0 { floor } else { DEFAULT_FLOOR };
        Self {
            state: Arc::new(Mutex::new(HistoryState {
                samples: VecDeque::with_capacity(capacity),
                max_volume: floor,
                volume_norm: 1.0 / floor,
            })),
            capacity,
            exponent,
        }
    }

    /// Loudness of one frame under this history's exponent
    pub fn loudness(&self, frame: &[i16]) -> Option<f64> {
        loudness(frame, self.exponent)
    }

    /// Append the loudness of `frame`. Empty frames are ignored.
    pub fn on_samples(&self, frame: &[i16]) {
        // Computed before locking so the audio thread holds the lock briefly.
        let Some(volume) = self.loudness(frame) else {
            return;
        };
        self.push(volume);
    }

    fn push(&self, volume: f64) {
        let mut state = self.state.lock();
        if volume > state.max_volume {
            state.max_volume = volume;
            state.volume_norm = 1.0 / volume;
        }
        if self.capacity == 0 {
            return;
        }
        if state.samples.len() == self.capacity {
            state.samples.pop_front();
        }
        state.samples.push_back(volume);
    }

    /// Copy out at most `max_len` of the most recent values
    pub fn snapshot(&self, max_len: usize) -> VolumeSnapshot {
        let state = self.state.lock();
        let skip = state.samples.len().saturating_sub(max_len);
        VolumeSnapshot {
            samples: state.samples.iter().skip(skip).copied().collect(),
            max_volume: state.max_volume,
            volume_norm: state.volume_norm,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn exponent(&self) -> f64 {
        self.exponent
    }

    /// Highest loudness seen so far (or the floor)
    pub fn max_volume(&self) -> f64 {
        self.state.lock().max_volume
    }

    /// Reciprocal of [`max_volume`](Self::max_volume)
    pub fn volume_norm(&self) -> f64 {
        self.state.lock().volume_norm
    }
}

/// Σ |sample · scale|^exponent / len, or `None` for an empty frame
pub fn loudness(frame: &[i16], exponent: f64) -> Option<f64> {
    if frame.is_empty() {
        return None;
    }
    let sum: f64 = if exponent == 2.0 {
        frame
            .iter()
            .map(|&s| {
                let rel = s as f64 * SAMPLE_SCALE;
                rel * rel
            })
            .sum()
    } else {
        frame
            .iter()
            .map(|&s| (s as f64 * SAMPLE_SCALE).abs().powf(exponent))
            .sum()
    };
    Some(sum / frame.len() as f64)
}

/// Immutable copy of a [`VolumeHistory`] for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSnapshot {
    samples: Vec<f64>,
    max_volume: f64,
    volume_norm: f64,
}

impl VolumeSnapshot {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Value at `index`, oldest first
    pub fn get(&self, index: usize) -> Option<f64> {
        self.samples.get(index).copied()
    }

    /// Most recent value
    pub fn latest(&self) -> Option<f64> {
        self.samples.last().copied()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn max_volume(&self) -> f64 {
        self.max_volume
    }

    pub fn volume_norm(&self) -> f64 {
        self.volume_norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_empty_snapshot() {
        let history = VolumeHistory::new(8);
        let snapshot = history.snapshot(100);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.latest(), None);
        assert_eq!(snapshot.max_volume(), DEFAULT_FLOOR);
        assert_eq!(snapshot.volume_norm(), 1.0 / DEFAULT_FLOOR);
    }

    #[test]
    fn test_zero_frame_appends_zero() {
        let history = VolumeHistory::new(8);
        history.on_samples(&[0; 64]);
        history.on_samples(&[0; 64]);

        let snapshot = history.snapshot(8);
        assert_eq!(snapshot.samples(), &[0.0, 0.0]);
        assert_eq!(snapshot.max_volume(), DEFAULT_FLOOR);
    }

    #[test]
    fn test_empty_frame_is_ignored() {
        let history = VolumeHistory::new(8);
        history.on_samples(&[]);
        assert!(history.is_empty());
    }

    #[test]
    fn test_mean_square_value() {
        let history = VolumeHistory::new(8);
        history.on_samples(&[128, -128, 256, -256]);
        // (1 + 1 + 4 + 4) / 4
        assert_eq!(history.snapshot(1).latest(), Some(2.5));
        assert_eq!(history.max_volume(), 2.5);
        assert_eq!(history.volume_norm(), 0.4);
    }

    #[test]
    fn test_quiet_frame_keeps_floor() {
        let history = VolumeHistory::new(8);
        history.on_samples(&[10; 16]);
        assert_eq!(history.max_volume(), DEFAULT_FLOOR);
    }

    #[test]
    fn test_fourth_power_exponent() {
        let history = VolumeHistory::with_params(8, 4.0, DEFAULT_FLOOR);
        history.on_samples(&[256, -256]);
        let latest = history.snapshot(1).latest().unwrap();
        assert!((latest - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_fifo_eviction() {
        let history = VolumeHistory::new(3);
        for amplitude in [128i16, 256, 384, 512] {
            history.on_samples(&[amplitude]);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.snapshot(10).samples(), &[4.0, 9.0, 16.0]);
    }

    #[test]
    fn test_snapshot_takes_most_recent() {
        let history = VolumeHistory::new(16);
        for amplitude in 1..=5i16 {
            history.on_samples(&[amplitude * 128]);
        }
        let snapshot = history.snapshot(2);
        assert_eq!(snapshot.samples(), &[16.0, 25.0]);
        assert_eq!(snapshot.max_volume(), 25.0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let history = VolumeHistory::new(4);
        history.on_samples(&[128]);
        let snapshot = history.snapshot(4);
        history.on_samples(&[1280]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.max_volume(), 1.0);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_concurrent_producer_and_reader() {
        let history = VolumeHistory::new(256);
        let producer = {
            let history = history.clone();
            thread::spawn(move || {
                for i in 0..5000i32 {
                    let amplitude = (i % 3000) as i16;
                    history.on_samples(&[amplitude, -amplitude]);
                }
            })
        };

        let mut last_max = 0.0;
        for _ in 0..500 {
            let snapshot = history.snapshot(128);
            assert!(snapshot.len() <= 128);
            assert!(snapshot.max_volume() >= last_max);
            assert!((snapshot.volume_norm() * snapshot.max_volume() - 1.0).abs() < 1e-12);
            last_max = snapshot.max_volume();
        }

        producer.join().unwrap();
        assert_eq!(history.len(), 256);
    }

    proptest! {
        #[test]
        fn prop_max_never_decreases(frames in prop::collection::vec(
            prop::collection::vec(any::<i16>(), 0..64), 1..40)) {
            let history = VolumeHistory::new(16);
            let mut previous = history.max_volume();
            for frame in &frames {
                history.on_samples(frame);
                let current = history.max_volume();
                prop_assert!(current >= previous);
                previous = current;
            }
            prop_assert!(history.len() <= 16);
        }

        #[test]
        fn prop_snapshot_never_pads(count in 0usize..40, k in 0usize..80) {
            let history = VolumeHistory::new(32);
            for _ in 0..count {
                history.on_samples(&[1000]);
            }
            prop_assert_eq!(history.snapshot(k).len(), k.min(count.min(32)));
        }
    }
}
