//! Run statistics: step-time averaging and particle cloud summaries

use glam::Vec3;
use serde::Serialize;
use sph_kernel::VectorView;
use std::time::Duration;

/// Sample count at which the averaging window shrinks back
const WINDOW_MAX: u32 = 20;
/// Window size the average restarts from once `WINDOW_MAX` is reached
const WINDOW_RESET: u32 = 4;

/// Running average of step durations.
///
/// Each sample is blended in with weight `1 / (n + 1)`. Once `n` reaches 20
/// it drops back to 4, so older samples fade out and the average follows
/// changes of the tunables within a few steps.
#[derive(Debug, Clone, Default)]
pub struct FrameTimeAverage {
    average_ms: f64,
    n: u32,
}

impl FrameTimeAverage {
    /// Empty average
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend in one sample
    pub fn push(&mut self, sample: Duration) {
        if self.n == WINDOW_MAX {
            self.n = WINDOW_RESET;
        }
        let n = self.n as f64;
        self.average_ms = (self.average_ms * n + sample.as_secs_f64() * 1000.0) / (n + 1.0);
        self.n += 1;
    }

    /// Current average in milliseconds, `None` before the first sample
    pub fn average_ms(&self) -> Option<f64> {
        (self.n > 0).then_some(self.average_ms)
    }
}

/// Axis-aligned extent and centroid of the particle positions
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSummary {
    /// Component-wise minimum
    pub min: Vec3,
    /// Component-wise maximum
    pub max: Vec3,
    /// Centroid
    pub mean: Vec3,
    /// Particles with a NaN or infinite component
    pub non_finite: usize,
}

impl PositionSummary {
    /// Summarize a view; non-finite positions are counted and skipped.
    /// Returns `None` when no finite position remains.
    pub fn from_view(view: &VectorView<'_>) -> Option<Self> {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        let mut sum = Vec3::ZERO;
        let mut finite = 0usize;
        let mut non_finite = 0usize;

        for p in view.iter() {
            if !p.is_finite() {
                non_finite += 1;
                continue;
            }
            min = min.min(p);
            max = max.max(p);
            sum += p;
            finite += 1;
        }

        (finite > 0).then(|| Self {
            min,
            max,
            mean: sum / finite as f32,
            non_finite,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_empty_average() {
        assert_eq!(FrameTimeAverage::new().average_ms(), None);
    }

    #[test]
    fn test_average_of_constant_samples() {
        let mut avg = FrameTimeAverage::new();
        for _ in 0..50 {
            avg.push(ms(4));
        }
        assert!((avg.average_ms().unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_samples_are_arithmetic_mean() {
        let mut avg = FrameTimeAverage::new();
        avg.push(ms(2));
        avg.push(ms(4));
        avg.push(ms(6));
        assert!((avg.average_ms().unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_reset_tracks_changes() {
        let mut avg = FrameTimeAverage::new();
        for _ in 0..WINDOW_MAX {
            avg.push(ms(10));
        }
        // With the window back at 4, each new sample carries weight 1/5.
        avg.push(ms(0));
        assert!((avg.average_ms().unwrap() - 8.0).abs() < 1e-9);

        for _ in 0..60 {
            avg.push(ms(0));
        }
        assert!(avg.average_ms().unwrap() < 0.1);
    }

    #[test]
    fn test_position_summary() {
        let points = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 1.0, 0.5),
            Vec3::new(1.0, 2.0, 1.0),
        ];
        let summary = PositionSummary::from_view(&VectorView::Packed(&points)).unwrap();
        assert_eq!(summary.min, Vec3::ZERO);
        assert_eq!(summary.max, Vec3::new(2.0, 2.0, 1.0));
        assert!((summary.mean - Vec3::new(1.0, 1.0, 0.5)).length() < 1e-6);
        assert_eq!(summary.non_finite, 0);
    }

    #[test]
    fn test_position_summary_skips_non_finite() {
        let points = [Vec3::ONE, Vec3::new(f32::NAN, 0.0, 0.0)];
        let summary = PositionSummary::from_view(&VectorView::Packed(&points)).unwrap();
        assert_eq!(summary.mean, Vec3::ONE);
        assert_eq!(summary.non_finite, 1);

        let bad = [Vec3::splat(f32::INFINITY)];
        assert!(PositionSummary::from_view(&VectorView::Packed(&bad)).is_none());
    }
}
