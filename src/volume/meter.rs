//! Terminal rendering of a volume snapshot

use super::VolumeSnapshot;

const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render the last `width` values as a sparkline scaled to the running peak.
///
/// An empty snapshot renders as an empty string.
pub fn render_meter(snapshot: &VolumeSnapshot, width: usize) -> String {
    let samples = snapshot.samples();
    let start = samples.len().saturating_sub(width);
    let norm = snapshot.volume_norm();

    samples[start..]
        .iter()
        .map(|&volume| {
            let relative = (volume * norm).clamp(0.0, 1.0);
            let index = (relative * (LEVELS.len() - 1) as f64).round() as usize;
            LEVELS[index]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeHistory;

    #[test]
    fn test_scaled_to_peak() {
        let history = VolumeHistory::new(16);
        history.on_samples(&[0; 4]);
        history.on_samples(&[1280; 4]);
        let meter = render_meter(&history.snapshot(16), 80);
        assert_eq!(meter, "▁█");
    }

    #[test]
    fn test_width_limits_output() {
        let history = VolumeHistory::new(16);
        for _ in 0..10 {
            history.on_samples(&[640; 4]);
        }
        assert_eq!(render_meter(&history.snapshot(16), 4).chars().count(), 4);
        assert!(render_meter(&VolumeHistory::new(4).snapshot(4), 10).is_empty());
    }
}
