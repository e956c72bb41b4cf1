use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::position::Position;

/// Counters shared by the worker threads and the control loop
#[derive(Debug)]
pub struct TelemetryCounters {
    started: Instant,
    pub ticks: AtomicU64,
    pub samples: AtomicU64,
    pub failed_polls: AtomicU64,
    pub dropped_messages: AtomicU64,
    pub crashes_detected: AtomicU64,
    pub summaries_flushed: AtomicU64,
    pub summaries_suppressed: AtomicU64,
    pub publish_failures: AtomicU64,
    pub gps_accepted: AtomicU64,
    pub gps_rejected: AtomicU64,
    pub inertial_healthy: AtomicBool,
    pub gps_healthy: AtomicBool,
}

impl TelemetryCounters {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            ticks: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            failed_polls: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            crashes_detected: AtomicU64::new(0),
            summaries_flushed: AtomicU64::new(0),
            summaries_suppressed: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            gps_accepted: AtomicU64::new(0),
            gps_rejected: AtomicU64::new(0),
            inertial_healthy: AtomicBool::new(true),
            gps_healthy: AtomicBool::new(true),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, position: &Position, trip_active: bool) -> LiveStatus {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LiveStatus {
            timestamp: current_timestamp(),
            uptime_seconds: self.started.elapsed().as_secs(),
            trip_active,
            ticks: get(&self.ticks),
            samples: get(&self.samples),
            failed_polls: get(&self.failed_polls),
            dropped_messages: get(&self.dropped_messages),
            crashes_detected: get(&self.crashes_detected),
            summaries_flushed: get(&self.summaries_flushed),
            summaries_suppressed: get(&self.summaries_suppressed),
            publish_failures: get(&self.publish_failures),
            gps_accepted: get(&self.gps_accepted),
            gps_rejected: get(&self.gps_rejected),
            inertial_healthy: self.inertial_healthy.load(Ordering::Relaxed),
            gps_healthy: self.gps_healthy.load(Ordering::Relaxed),
            gps_valid: position.valid,
            gps_stale: position.stale,
            gps_lat: position.latitude,
            gps_lon: position.longitude,
        }
    }
}

impl Default for TelemetryCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub trip_active: bool,
    pub ticks: u64,
    pub samples: u64,
    pub failed_polls: u64,
    pub dropped_messages: u64,
    pub crashes_detected: u64,
    pub summaries_flushed: u64,
    pub summaries_suppressed: u64,
    pub publish_failures: u64,
    pub gps_accepted: u64,
    pub gps_rejected: u64,
    // Health
    pub inertial_healthy: bool,
    pub gps_healthy: bool,
    // Position
    pub gps_valid: bool,
    pub gps_stale: bool,
    pub gps_lat: f64,
    pub gps_lon: f64,
}

impl LiveStatus {
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
