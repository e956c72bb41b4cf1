use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// What the `vibrations` field of a driving summary reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibrationMode {
    /// Vibrations counted during the flushed window
    Delta,
    /// Raw counter value since process start
    Cumulative,
}

/// What happens to the cached position when the receiver reports "no fix"
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixLossPolicy {
    /// Keep the last good coordinates and mark them stale
    RetainLastGood,
    /// Drop back to the unavailable sentinel
    Invalidate,
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    // ── Collision detection ──
    pub g_force_threshold: f64,
    pub crash_debounce_ms: u64,
    pub shock_switch_triggers_crash: bool,

    // ── Discrete switches ──
    pub shock_debounce_ms: u64,

    // ── Cadences ──
    pub inertial_interval_ms: u64,
    pub gps_interval_ms: u64,
    pub summary_every_ticks: u64,
    pub position_every_ticks: u64,

    // ── Bus retry ──
    pub bus_retry_count: u32,
    pub bus_retry_delay_ms: u64,

    // ── Devices ──
    pub i2c_bus: PathBuf,
    pub mpu_address: u8,
    /// GPIO character device the switch lines are requested from
    pub gpio_chip: PathBuf,
    /// Line offsets on `gpio_chip`
    pub vibration_pin: u32,
    pub shock_pin: u32,
    pub gps_port: PathBuf,
    pub gps_baud_rate: u32,
    pub gps_read_timeout_ms: u64,
    /// No sentence for this long marks the GPS stream unavailable
    pub gps_silence_timeout_ms: u64,

    // ── Aggregation / position policy ──
    pub vibration_mode: VibrationMode,
    pub fix_loss_policy: FixLossPolicy,

    // ── Runtime ──
    pub shutdown_timeout_ms: u64,
    pub channel_capacity: usize,
    pub status_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            g_force_threshold: 3.5,
            crash_debounce_ms: 100,
            shock_switch_triggers_crash: false,
            shock_debounce_ms: 100,
            inertial_interval_ms: 1000,
            gps_interval_ms: 1000,
            summary_every_ticks: 30,
            position_every_ticks: 3,
            bus_retry_count: 6,
            bus_retry_delay_ms: 100,
            i2c_bus: PathBuf::from("/dev/i2c-1"),
            mpu_address: 0x68,
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            vibration_pin: 17,
            shock_pin: 27,
            gps_port: PathBuf::from("/dev/ttyS0"),
            gps_baud_rate: 9600,
            gps_read_timeout_ms: 1000,
            gps_silence_timeout_ms: 5000,
            vibration_mode: VibrationMode::Delta,
            fix_loss_policy: FixLossPolicy::RetainLastGood,
            shutdown_timeout_ms: 2000,
            channel_capacity: 256,
            status_path: None,
        }
    }
}

impl TelemetryConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.g_force_threshold.is_finite() && self.g_force_threshold > 0.0) {
            return Err(invalid("g_force_threshold", "must be a positive number"));
        }
        if self.inertial_interval_ms == 0 {
            return Err(invalid("inertial_interval_ms", "must be non-zero"));
        }
        if self.gps_interval_ms == 0 {
            return Err(invalid("gps_interval_ms", "must be non-zero"));
        }
        if self.summary_every_ticks == 0 {
            return Err(invalid("summary_every_ticks", "must be non-zero"));
        }
        if self.position_every_ticks == 0 {
            return Err(invalid("position_every_ticks", "must be non-zero"));
        }
        if self.gps_baud_rate == 0 {
            return Err(invalid("gps_baud_rate", "must be non-zero"));
        }
        if self.gps_read_timeout_ms == 0 {
            return Err(invalid("gps_read_timeout_ms", "must be non-zero"));
        }
        if self.gps_silence_timeout_ms < self.gps_read_timeout_ms {
            return Err(invalid(
                "gps_silence_timeout_ms",
                "must be at least gps_read_timeout_ms",
            ));
        }
        if self.bus_retry_count == 0 {
            return Err(invalid("bus_retry_count", "must allow at least one attempt"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", "must be non-zero"));
        }
        Ok(())
    }

    pub fn crash_debounce(&self) -> Duration {
        Duration::from_millis(self.crash_debounce_ms)
    }

    pub fn shock_debounce(&self) -> Duration {
        Duration::from_millis(self.shock_debounce_ms)
    }

    pub fn inertial_interval(&self) -> Duration {
        Duration::from_millis(self.inertial_interval_ms)
    }

    pub fn gps_interval(&self) -> Duration {
        Duration::from_millis(self.gps_interval_ms)
    }

    pub fn gps_read_timeout(&self) -> Duration {
        Duration::from_millis(self.gps_read_timeout_ms)
    }

    pub fn gps_silence_timeout(&self) -> Duration {
        Duration::from_millis(self.gps_silence_timeout_ms)
    }

    pub fn bus_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bus_retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
