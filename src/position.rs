use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::config::FixLossPolicy;
use crate::error::NmeaError;
use crate::nmea::{self, Fix, Rmc};

/// Coordinate string used whenever no usable fix exists
pub const COORDINATES_UNAVAILABLE: &str = "unavailable";

/// Best-known GPS position.
///
/// `valid` is false until the first accepted fix. Under
/// [`FixLossPolicy::RetainLastGood`] a later "no fix" report keeps `valid`
/// and the coordinates but sets `stale`; under [`FixLossPolicy::Invalidate`]
/// it clears `valid`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub valid: bool,
    pub stale: bool,
    pub fixed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn unavailable() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            valid: false,
            stale: false,
            fixed_at: None,
        }
    }

    /// WKT point (`POINT(lon lat)`, six decimals) or [`COORDINATES_UNAVAILABLE`]
    pub fn coordinates(&self) -> String {
        if self.valid {
            format!("POINT({:.6} {:.6})", self.longitude, self.latitude)
        } else {
            COORDINATES_UNAVAILABLE.to_string()
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// Outcome of feeding one line to the provider
#[derive(Debug, PartialEq)]
pub enum Ingest {
    Accepted,
    NoFix,
    /// Not an RMC sentence
    Ignored,
    Rejected(NmeaError),
}

/// Position cache shared between the GPS loop (single writer) and everyone
/// else. The lock is only held to copy a `Position` in or out.
#[derive(Clone, Debug)]
pub struct PositionProvider {
    current: Arc<RwLock<Position>>,
    policy: FixLossPolicy,
}

impl PositionProvider {
    pub fn new(policy: FixLossPolicy) -> Self {
        Self {
            current: Arc::new(RwLock::new(Position::unavailable())),
            policy,
        }
    }

    /// Never blocks on the receiver; returns whatever is known right now.
    pub fn get_current_position(&self) -> Position {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn ingest(&self, line: &str) -> Ingest {
        if !nmea::is_rmc(line.trim()) {
            return Ingest::Ignored;
        }
        match nmea::parse_rmc(line) {
            Ok(Rmc::Fix(fix)) => {
                self.record_fix(fix);
                Ingest::Accepted
            }
            Ok(Rmc::NoFix) => {
                self.record_no_fix();
                Ingest::NoFix
            }
            Err(e) => {
                log::debug!("[gps] discarding sentence: {} ({})", e, line);
                Ingest::Rejected(e)
            }
        }
    }

    fn record_fix(&self, fix: Fix) {
        let position = Position {
            latitude: fix.latitude,
            longitude: fix.longitude,
            valid: true,
            stale: false,
            fixed_at: Some(Utc::now()),
        };
        self.write(|current| *current = position);
    }

    fn record_no_fix(&self) {
        let policy = self.policy;
        self.write(|current| match policy {
            FixLossPolicy::RetainLastGood => {
                if current.valid {
                    current.stale = true;
                }
            }
            FixLossPolicy::Invalidate => {
                current.valid = false;
                current.stale = false;
            }
        });
    }

    fn write(&self, update: impl FnOnce(&mut Position)) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut guard);
    }
}
