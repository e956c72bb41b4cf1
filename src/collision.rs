use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::TelemetryConfig;
use crate::position::Position;
use crate::sample::Sample;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashSource {
    GForce,
    ShockSwitch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrashEvent {
    pub detected_at: DateTime<Utc>,
    /// g-force magnitude of the triggering sample
    pub impact_force: f64,
    pub coordinates: String,
    pub source: CrashSource,
}

/// Per-sample overload detection, debounced per trigger source.
pub struct CollisionDetector {
    threshold: f64,
    debounce: Duration,
    shock_triggers_crash: bool,
    last_g_force_trigger: Option<Instant>,
    last_shock_trigger: Option<Instant>,
    last_shock_count: u64,
}

impl CollisionDetector {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            threshold: config.g_force_threshold,
            debounce: config.crash_debounce(),
            shock_triggers_crash: config.shock_switch_triggers_crash,
            last_g_force_trigger: None,
            last_shock_trigger: None,
            last_shock_count: 0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Must be called for every sample, in read order.
    pub fn inspect(&mut self, sample: &Sample, position: &Position) -> Option<CrashEvent> {
        let magnitude = sample.g_force_magnitude();
        let now = sample.instant;

        let over_threshold = magnitude > self.threshold;
        let g_force =
            over_threshold && Self::debounced(self.last_g_force_trigger, now, self.debounce);

        let new_shock = sample.shock_count > self.last_shock_count;
        self.last_shock_count = self.last_shock_count.max(sample.shock_count);
        let shock = self.shock_triggers_crash
            && new_shock
            && Self::debounced(self.last_shock_trigger, now, self.debounce);

        if g_force {
            self.last_g_force_trigger = Some(now);
        }
        if shock {
            self.last_shock_trigger = Some(now);
        }

        let source = match (g_force, shock) {
            (true, _) => CrashSource::GForce,
            (false, true) => CrashSource::ShockSwitch,
            (false, false) => {
                if over_threshold {
                    log::debug!("[inertial] overload {:.2} g within debounce window", magnitude);
                }
                return None;
            }
        };

        Some(CrashEvent {
            detected_at: sample.captured_at,
            impact_force: magnitude,
            coordinates: position.coordinates(),
            source,
        })
    }

    fn debounced(last: Option<Instant>, now: Instant, window: Duration) -> bool {
        last.map_or(true, |last| now.saturating_duration_since(last) >= window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::COORDINATES_UNAVAILABLE;
    use crate::sample::fixtures::sample;

    fn at(g: (f64, f64, f64), instant: Instant) -> Sample {
        Sample {
            instant,
            ..sample(0.0, g)
        }
    }

    fn detector() -> CollisionDetector {
        CollisionDetector::new(&TelemetryConfig::default())
    }

    #[test]
    fn test_triggers_above_threshold() {
        let mut detector = detector();
        let event = detector
            .inspect(&at((4.0, 0.0, 0.0), Instant::now()), &Position::unavailable())
            .unwrap();
        assert_eq!(event.impact_force, 4.0);
        assert_eq!(event.source, CrashSource::GForce);
        assert_eq!(event.coordinates, COORDINATES_UNAVAILABLE);
    }

    #[test]
    fn test_no_trigger_just_below_threshold() {
        let mut detector = detector();
        let below = 3.5 - 1e-9;
        assert!(detector
            .inspect(&at((below, 0.0, 0.0), Instant::now()), &Position::unavailable())
            .is_none());
        // Exactly at threshold is not an overload either
        assert!(detector
            .inspect(&at((3.5, 0.0, 0.0), Instant::now()), &Position::unavailable())
            .is_none());
    }

    #[test]
    fn test_debounce_within_window() {
        let mut detector = detector();
        let t0 = Instant::now();
        let position = Position::unavailable();

        let first = detector.inspect(&at((4.0, 0.0, 0.0), t0), &position);
        let second =
            detector.inspect(&at((4.2, 0.0, 0.0), t0 + Duration::from_millis(50)), &position);
        assert!(first.is_some());
        assert!(second.is_none());

        let third =
            detector.inspect(&at((4.2, 0.0, 0.0), t0 + Duration::from_millis(150)), &position);
        assert!(third.is_some());
    }

    #[test]
    fn test_attaches_position() {
        let mut detector = detector();
        let position = Position {
            latitude: 16.75,
            longitude: -93.1,
            valid: true,
            stale: false,
            fixed_at: None,
        };
        let event = detector
            .inspect(&at((0.0, 0.0, 5.0), Instant::now()), &position)
            .unwrap();
        assert_eq!(event.coordinates, "POINT(-93.100000 16.750000)");
    }

    #[test]
    fn test_shock_switch_trigger_opt_in() {
        let t0 = Instant::now();
        let shocked = Sample {
            shock_count: 1,
            ..at((0.0, 1.0, 0.0), t0)
        };

        let mut disabled = detector();
        assert!(disabled.inspect(&shocked, &Position::unavailable()).is_none());

        let mut enabled = CollisionDetector::new(&TelemetryConfig {
            shock_switch_triggers_crash: true,
            ..TelemetryConfig::default()
        });
        let event = enabled.inspect(&shocked, &Position::unavailable()).unwrap();
        assert_eq!(event.source, CrashSource::ShockSwitch);

        // Same count again is not a new shock
        let repeat = Sample {
            instant: t0 + Duration::from_millis(500),
            ..shocked.clone()
        };
        assert!(enabled.inspect(&repeat, &Position::unavailable()).is_none());
    }

    #[test]
    fn test_both_sources_yield_one_event() {
        let mut detector = CollisionDetector::new(&TelemetryConfig {
            shock_switch_triggers_crash: true,
            ..TelemetryConfig::default()
        });
        let both = Sample {
            shock_count: 1,
            ..at((4.0, 0.0, 0.0), Instant::now())
        };
        let event = detector.inspect(&both, &Position::unavailable()).unwrap();
        assert_eq!(event.source, CrashSource::GForce);
    }
}
