//! Simulated sources for bench runs without the kit hardware.

use std::f64::consts::PI;

use crate::error::SensorResult;
use crate::nmea;
use crate::sample::{RawInertial, ACCEL_COUNTS_PER_G, GYRO_COUNTS_PER_DPS};
use crate::sensors::{InertialSource, NmeaSource, SwitchInput};

/// Gentle stop-and-go driving with a hard jolt every `jolt_every` reads
pub struct SimulatedInertial {
    tick: u64,
    jolt_every: u64,
}

impl SimulatedInertial {
    pub fn new(jolt_every: u64) -> Self {
        Self { tick: 0, jolt_every }
    }
}

impl InertialSource for SimulatedInertial {
    fn initialize(&mut self) -> SensorResult<()> {
        Ok(())
    }

    fn read_raw(&mut self) -> SensorResult<RawInertial> {
        self.tick += 1;
        let t = self.tick as f64 * 0.1;

        let (gx, gy, gz) = if self.jolt_every > 0 && self.tick % self.jolt_every == 0 {
            (1.9, 1.0, 1.9)
        } else {
            ((t * 2.0 * PI).sin() * 0.3, 1.0 + (t * PI).sin() * 0.05, (t * 0.5).cos() * 0.1)
        };
        let counts =
            |g: f64| (g * ACCEL_COUNTS_PER_G).clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        let rate = |dps: f64| (dps * GYRO_COUNTS_PER_DPS) as i16;

        Ok(RawInertial {
            accel: [counts(gx), counts(gy), counts(gz)],
            gyro: [rate((t * 0.5).sin() * 3.0), rate((t * 0.3).cos() * 2.0), rate(t.sin() * 5.0)],
        })
    }
}

/// Active for `on` reads out of every `period`
pub struct SimulatedSwitch {
    tick: u64,
    period: u64,
    on: u64,
}

impl SimulatedSwitch {
    pub fn new(period: u64, on: u64) -> Self {
        Self { tick: 0, period: period.max(1), on }
    }
}

impl SwitchInput for SimulatedSwitch {
    fn is_active(&mut self) -> SensorResult<bool> {
        self.tick += 1;
        Ok(self.tick % self.period < self.on)
    }
}

/// RMC sentences drifting north-east from a start point. Alternates a
/// sentence with "nothing available" so the GPS loop paces itself.
pub struct SimulatedNmea {
    seq: u64,
    pending: bool,
    latitude: f64,
    longitude: f64,
    fix_after: u64,
}

impl SimulatedNmea {
    /// `fix_after`: number of "V" sentences before the receiver reports a fix
    pub fn new(latitude: f64, longitude: f64, fix_after: u64) -> Self {
        Self {
            seq: 0,
            pending: true,
            latitude,
            longitude,
            fix_after,
        }
    }
}

impl NmeaSource for SimulatedNmea {
    fn read_line(&mut self) -> SensorResult<Option<String>> {
        if !self.pending {
            self.pending = true;
            return Ok(None);
        }
        self.pending = false;
        self.seq += 1;

        let drift = self.seq as f64 * 0.00001;
        let status = if self.seq > self.fix_after { 'A' } else { 'V' };
        Ok(Some(nmea::format_rmc(
            status,
            self.latitude + drift,
            self.longitude + drift,
        )))
    }
}
