use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Whether driving and crash output should currently be published
pub trait TravelGate: Send + Sync {
    fn is_trip_active(&self) -> bool;
}

/// Who the outgoing telemetry belongs to
pub trait IdentityResolver: Send + Sync {
    fn kit_id(&self) -> String;

    /// Driver of the active trip, if any
    fn current_driver_id(&self) -> Option<String>;

    /// Current driver, or the one from the most recent trip
    fn last_driver_id(&self) -> Option<String>;

    fn current_identity(&self) -> Identity {
        Identity {
            kit_id: self.kit_id(),
            driver_id: self.current_driver_id(),
        }
    }

    fn last_known_identity(&self) -> Identity {
        Identity {
            kit_id: self.kit_id(),
            driver_id: self.last_driver_id(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub kit_id: String,
    pub driver_id: Option<String>,
}

#[derive(Debug)]
struct TripState {
    kit_id: String,
    active: bool,
    driver_id: Option<String>,
    last_driver_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

/// The single "current trip" of this kit. Share it behind an `Arc` with
/// whatever drives the trip lifecycle.
#[derive(Debug)]
pub struct TravelContext {
    state: RwLock<TripState>,
}

impl TravelContext {
    pub fn new(kit_id: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(TripState {
                kit_id: kit_id.into(),
                active: false,
                driver_id: None,
                last_driver_id: None,
                started_at: None,
            }),
        }
    }

    pub fn start_trip(&self, kit_id: impl Into<String>, driver_id: impl Into<String>) {
        let mut state = self.write();
        let driver_id = driver_id.into();
        state.kit_id = kit_id.into();
        state.active = true;
        state.driver_id = Some(driver_id.clone());
        state.last_driver_id = Some(driver_id);
        state.started_at = Some(Utc::now());
        log::info!(
            "[travel] trip started (kit {}, driver {})",
            state.kit_id,
            state.driver_id.as_deref().unwrap_or("-")
        );
    }

    /// Returns false if no trip was active.
    pub fn end_trip(&self) -> bool {
        let mut state = self.write();
        if !state.active {
            return false;
        }
        state.active = false;
        state.driver_id = None;
        if let Some(started) = state.started_at.take() {
            let minutes = (Utc::now() - started).num_minutes();
            log::info!("[travel] trip ended after {} min", minutes);
        }
        true
    }

    pub fn trip_started_at(&self) -> Option<DateTime<Utc>> {
        self.read().started_at
    }

    fn read(&self) -> RwLockReadGuard<'_, TripState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TripState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TravelGate for TravelContext {
    fn is_trip_active(&self) -> bool {
        self.read().active
    }
}

impl IdentityResolver for TravelContext {
    fn kit_id(&self) -> String {
        self.read().kit_id.clone()
    }

    fn current_driver_id(&self) -> Option<String> {
        self.read().driver_id.clone()
    }

    fn last_driver_id(&self) -> Option<String> {
        let state = self.read();
        state.driver_id.clone().or_else(|| state.last_driver_id.clone())
    }
}
