use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VibrationMode;
use crate::sample::Sample;

/// Statistics of one flushed window. Every average is zero when its
/// subpopulation is empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrivingSummary {
    /// Mean of the positive longitudinal samples (m/s²)
    pub avg_acceleration: f64,
    /// Mean magnitude of the negative longitudinal samples (m/s²)
    pub avg_deceleration: f64,
    pub vibration_delta: u64,
    pub avg_inclination_angle: f64,
    pub avg_angular_velocity: f64,
    pub avg_g_force_x: f64,
    pub avg_g_force_y: f64,
    pub travel_coordinates: String,
    pub captured_at: DateTime<Utc>,
    pub window_started_at: Option<DateTime<Utc>>,
    pub sample_count: usize,
}

/// Buffers samples between flush boundaries.
pub struct SampleAggregator {
    window: Vec<Sample>,
    mode: VibrationMode,
    vibration_baseline: u64,
}

impl SampleAggregator {
    pub fn new(mode: VibrationMode) -> Self {
        Self {
            window: Vec::new(),
            mode,
            vibration_baseline: 0,
        }
    }

    pub fn accumulate(&mut self, sample: Sample) {
        self.window.push(sample);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Summarize and clear the window. The buffer is swapped out before any
    /// statistic is computed, so nothing from this window reaches the next.
    pub fn flush(&mut self, travel_coordinates: String) -> DrivingSummary {
        let window = std::mem::take(&mut self.window);

        let vibration_delta = match window.last() {
            None => 0,
            Some(last) => match self.mode {
                VibrationMode::Cumulative => last.vibration_count,
                VibrationMode::Delta => {
                    let delta = last.vibration_count.saturating_sub(self.vibration_baseline);
                    self.vibration_baseline = last.vibration_count;
                    delta
                }
            },
        };

        DrivingSummary {
            avg_acceleration: mean(window.iter().map(|s| s.accel_x).filter(|a| *a > 0.0)),
            avg_deceleration: mean(
                window
                    .iter()
                    .map(|s| s.accel_x)
                    .filter(|a| *a < 0.0)
                    .map(f64::abs),
            ),
            vibration_delta,
            avg_inclination_angle: mean(window.iter().map(|s| s.inclination_angle)),
            avg_angular_velocity: mean(window.iter().map(Sample::angular_velocity)),
            avg_g_force_x: mean(window.iter().map(|s| s.g_force_x)),
            avg_g_force_y: mean(window.iter().map(|s| s.g_force_y)),
            travel_coordinates,
            captured_at: Utc::now(),
            window_started_at: window.first().map(|s| s.captured_at),
            sample_count: window.len(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::COORDINATES_UNAVAILABLE;
    use crate::sample::fixtures::sample;
    use approx::assert_relative_eq;

    fn with_vibrations(count: u64) -> Sample {
        Sample {
            vibration_count: count,
            ..sample(0.0, (0.0, 1.0, 0.0))
        }
    }

    fn assert_zeroed(summary: &DrivingSummary) {
        assert_eq!(summary.avg_acceleration, 0.0);
        assert_eq!(summary.avg_deceleration, 0.0);
        assert_eq!(summary.vibration_delta, 0);
        assert_eq!(summary.avg_inclination_angle, 0.0);
        assert_eq!(summary.avg_angular_velocity, 0.0);
        assert_eq!(summary.avg_g_force_x, 0.0);
        assert_eq!(summary.avg_g_force_y, 0.0);
        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.window_started_at, None);
    }

    #[test]
    fn test_mixed_window_partition() {
        let mut aggregator = SampleAggregator::new(VibrationMode::Delta);
        for _ in 0..10 {
            aggregator.accumulate(sample(2.0, (0.0, 1.0, 0.0)));
        }
        for _ in 0..5 {
            aggregator.accumulate(sample(-1.0, (0.0, 1.0, 0.0)));
        }
        for _ in 0..15 {
            aggregator.accumulate(sample(0.0, (0.0, 1.0, 0.0)));
        }
        assert_eq!(aggregator.len(), 30);

        let summary = aggregator.flush(COORDINATES_UNAVAILABLE.to_string());
        assert_relative_eq!(summary.avg_acceleration, 2.0);
        assert_relative_eq!(summary.avg_deceleration, 1.0);
        assert_eq!(summary.sample_count, 30);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_only_braking() {
        let mut aggregator = SampleAggregator::new(VibrationMode::Delta);
        aggregator.accumulate(sample(-3.0, (0.0, 1.0, 0.0)));
        aggregator.accumulate(sample(-1.0, (0.0, 1.0, 0.0)));

        let summary = aggregator.flush(String::new());
        assert_eq!(summary.avg_acceleration, 0.0);
        assert_relative_eq!(summary.avg_deceleration, 2.0);
    }

    #[test]
    fn test_double_flush_returns_zeroed_summary() {
        let mut aggregator = SampleAggregator::new(VibrationMode::Delta);
        aggregator.accumulate(sample(2.0, (0.5, 0.5, 0.0)));
        let first = aggregator.flush("POINT(1 2)".to_string());
        assert_eq!(first.sample_count, 1);

        let second = aggregator.flush("POINT(1 2)".to_string());
        assert_zeroed(&second);
        assert_eq!(second.travel_coordinates, "POINT(1 2)");
    }

    #[test]
    fn test_empty_flush() {
        let mut aggregator = SampleAggregator::new(VibrationMode::Delta);
        assert_zeroed(&aggregator.flush(COORDINATES_UNAVAILABLE.to_string()));
    }

    #[test]
    fn test_axis_and_angular_means() {
        let mut aggregator = SampleAggregator::new(VibrationMode::Delta);
        let mut a = sample(0.0, (0.2, 0.8, 0.0));
        a.gyro_x = 3.0;
        a.inclination_angle = 10.0;
        let mut b = sample(0.0, (0.4, 1.0, 0.0));
        b.gyro_y = -6.0;
        b.inclination_angle = 0.0;
        aggregator.accumulate(a);
        aggregator.accumulate(b);

        let summary = aggregator.flush(String::new());
        assert_relative_eq!(summary.avg_g_force_x, 0.3, epsilon = 1e-12);
        assert_relative_eq!(summary.avg_g_force_y, 0.9, epsilon = 1e-12);
        assert_relative_eq!(summary.avg_inclination_angle, 5.0);
        // (3/3 + 6/3) / 2
        assert_relative_eq!(summary.avg_angular_velocity, 1.5);
    }

    #[test]
    fn test_vibration_delta_per_window() {
        let mut aggregator = SampleAggregator::new(VibrationMode::Delta);
        aggregator.accumulate(with_vibrations(3));
        aggregator.accumulate(with_vibrations(7));
        assert_eq!(aggregator.flush(String::new()).vibration_delta, 7);

        aggregator.accumulate(with_vibrations(9));
        aggregator.accumulate(with_vibrations(12));
        assert_eq!(aggregator.flush(String::new()).vibration_delta, 5);

        // Empty window does not move the baseline
        assert_eq!(aggregator.flush(String::new()).vibration_delta, 0);
        aggregator.accumulate(with_vibrations(12));
        assert_eq!(aggregator.flush(String::new()).vibration_delta, 0);
    }

    #[test]
    fn test_vibration_cumulative() {
        let mut aggregator = SampleAggregator::new(VibrationMode::Cumulative);
        aggregator.accumulate(with_vibrations(7));
        assert_eq!(aggregator.flush(String::new()).vibration_delta, 7);
        aggregator.accumulate(with_vibrations(12));
        assert_eq!(aggregator.flush(String::new()).vibration_delta, 12);
    }
}
