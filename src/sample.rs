use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Accelerometer LSB per g at the ±2g range
pub const ACCEL_COUNTS_PER_G: f64 = 16384.0;
/// Gyroscope LSB per deg/s at the ±250 deg/s range
pub const GYRO_COUNTS_PER_DPS: f64 = 131.0;
pub const GRAVITY: f64 = 9.81; // m/s²

/// Raw register values from one inertial read (16-bit two's complement)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInertial {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
}

/// One instantaneous reading. Immutable once built; consumers get their own copy.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub instant: Instant,
    pub captured_at: DateTime<Utc>,
    pub accel_x: f64, // m/s²
    pub accel_y: f64,
    pub accel_z: f64,
    pub gyro_x: f64, // deg/s
    pub gyro_y: f64,
    pub gyro_z: f64,
    pub inclination_angle: f64, // degrees
    pub vibration_count: u64,
    pub shock_count: u64,
    pub g_force_x: f64, // g
    pub g_force_y: f64,
    pub g_force_z: f64,
}

impl Sample {
    /// Convert raw counts into physical units.
    pub fn from_raw(
        raw: RawInertial,
        instant: Instant,
        captured_at: DateTime<Utc>,
        vibration_count: u64,
        shock_count: u64,
    ) -> Self {
        let [ax, ay, az] = raw.accel.map(|c| c as f64 / ACCEL_COUNTS_PER_G);
        let [gx, gy, gz] = raw.gyro.map(|c| c as f64 / GYRO_COUNTS_PER_DPS);

        Self {
            instant,
            captured_at,
            accel_x: ax * GRAVITY,
            accel_y: ay * GRAVITY,
            accel_z: az * GRAVITY,
            gyro_x: gx,
            gyro_y: gy,
            gyro_z: gz,
            inclination_angle: inclination_from_g(ay),
            vibration_count,
            shock_count,
            g_force_x: ax,
            g_force_y: ay,
            g_force_z: az,
        }
    }

    /// sqrt(x² + y² + z²) over the g ratios, recomputed on every call
    pub fn g_force_magnitude(&self) -> f64 {
        Vector3::new(self.g_force_x, self.g_force_y, self.g_force_z).norm()
    }

    /// Mean absolute angular rate across the three gyro axes
    pub fn angular_velocity(&self) -> f64 {
        (self.gyro_x.abs() + self.gyro_y.abs() + self.gyro_z.abs()) / 3.0
    }
}

/// Tilt in degrees from the y-axis g ratio: 0 at y = 1g, 90 at y = 0, 180 at y = -1g.
fn inclination_from_g(g_y: f64) -> f64 {
    ((g_y - 1.0) * 180.0 / -2.0).trunc()
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_g_force_unit_axis() {
        assert_eq!(sample(0.0, (1.0, 0.0, 0.0)).g_force_magnitude(), 1.0);
    }

    #[test]
    fn test_g_force_zero() {
        assert_eq!(sample(0.0, (0.0, 0.0, 0.0)).g_force_magnitude(), 0.0);
    }

    #[test]
    fn test_g_force_3d() {
        let s = sample(0.0, (2.0, 3.0, 6.0));
        assert_relative_eq!(s.g_force_magnitude(), 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_from_raw_units() {
        let raw = RawInertial {
            accel: [16384, -8192, 0],
            gyro: [131, -262, 0],
        };
        let s = Sample::from_raw(raw, Instant::now(), Utc::now(), 4, 1);

        assert_relative_eq!(s.g_force_x, 1.0);
        assert_relative_eq!(s.g_force_y, -0.5);
        assert_relative_eq!(s.accel_x, 9.81);
        assert_relative_eq!(s.accel_y, -4.905);
        assert_relative_eq!(s.gyro_x, 1.0);
        assert_relative_eq!(s.gyro_y, -2.0);
        assert_relative_eq!(s.angular_velocity(), 1.0);
        assert_eq!(s.vibration_count, 4);
        assert_eq!(s.shock_count, 1);
    }

    #[test]
    fn test_inclination() {
        assert_eq!(inclination_from_g(1.0), 0.0);
        assert_eq!(inclination_from_g(0.0), 90.0);
        assert_eq!(inclination_from_g(-1.0), 180.0);
        // Truncates toward zero
        assert_eq!(inclination_from_g(0.99), 0.0);
    }
}
