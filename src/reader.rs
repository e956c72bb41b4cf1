use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::config::TelemetryConfig;
use crate::error::{SensorError, SensorResult};
use crate::sample::Sample;
use crate::sensors::{InertialSource, SwitchInput};

/// Polls the inertial source and the two switches, producing one [`Sample`]
/// per call.
///
/// Bus failures are retried a bounded number of times with a fixed delay.
/// When retries run out the bus is marked for re-initialization, which is
/// attempted once at the start of the next poll. A reader whose bus never
/// comes up keeps returning errors; it never panics.
pub struct SampleReader {
    inertial: Box<dyn InertialSource>,
    vibration: Box<dyn SwitchInput>,
    shock: Box<dyn SwitchInput>,
    retry_count: u32,
    retry_delay: Duration,
    shock_debounce: Duration,
    initialized: bool,
    vibration_count: u64,
    shock_count: u64,
    last_shock: Option<Instant>,
}

impl SampleReader {
    pub fn new(
        inertial: Box<dyn InertialSource>,
        vibration: Box<dyn SwitchInput>,
        shock: Box<dyn SwitchInput>,
        config: &TelemetryConfig,
    ) -> Self {
        Self {
            inertial,
            vibration,
            shock,
            retry_count: config.bus_retry_count.max(1),
            retry_delay: config.bus_retry_delay(),
            shock_debounce: config.shock_debounce(),
            initialized: false,
            vibration_count: 0,
            shock_count: 0,
            last_shock: None,
        }
    }

    /// Bring the bus up, retrying like a read. Failure is logged once and
    /// leaves the reader degraded; later polls retry lazily.
    pub fn initialize(&mut self) -> bool {
        let mut last_error = None;
        for attempt in 1..=self.retry_count {
            match self.inertial.initialize() {
                Ok(()) => {
                    log::info!("[inertial] bus initialized (attempt {})", attempt);
                    self.initialized = true;
                    return true;
                }
                Err(e) => {
                    log::debug!(
                        "[inertial] init attempt {}/{} failed: {}",
                        attempt,
                        self.retry_count,
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.retry_count {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        if let Some(e) = last_error {
            log::error!(
                "[inertial] bus init failed after {} attempts, running degraded: {}",
                self.retry_count,
                e
            );
        }
        self.initialized = false;
        false
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn vibration_count(&self) -> u64 {
        self.vibration_count
    }

    pub fn shock_count(&self) -> u64 {
        self.shock_count
    }

    pub fn poll(&mut self) -> SensorResult<Sample> {
        self.poll_at(Instant::now(), Utc::now())
    }

    pub(crate) fn poll_at(
        &mut self,
        now: Instant,
        captured_at: DateTime<Utc>,
    ) -> SensorResult<Sample> {
        // Counters keep running even while the inertial bus is down
        self.read_switches(now);

        if !self.initialized {
            self.inertial.initialize()?;
            log::info!("[inertial] bus re-initialized");
            self.initialized = true;
        }

        let raw = self.read_with_retry()?;
        Ok(Sample::from_raw(
            raw,
            now,
            captured_at,
            self.vibration_count,
            self.shock_count,
        ))
    }

    fn read_with_retry(&mut self) -> SensorResult<crate::sample::RawInertial> {
        let mut last = String::new();
        for attempt in 1..=self.retry_count {
            match self.inertial.read_raw() {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    log::debug!(
                        "[inertial] read attempt {}/{} failed: {}",
                        attempt,
                        self.retry_count,
                        e
                    );
                    last = e.to_string();
                    if attempt < self.retry_count {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        self.initialized = false;
        Err(SensorError::RetriesExhausted {
            attempts: self.retry_count,
            last,
        })
    }

    fn read_switches(&mut self, now: Instant) {
        // Vibration is continuous: count every active read
        if read_pin(self.vibration.as_mut(), "vibration") {
            self.vibration_count += 1;
        }

        // Shock is discrete: one count per debounce window
        if read_pin(self.shock.as_mut(), "shock") {
            let debounced = self
                .last_shock
                .map_or(true, |last| now.saturating_duration_since(last) > self.shock_debounce);
            if debounced {
                self.shock_count += 1;
                self.last_shock = Some(now);
            }
        }
    }
}

fn read_pin(pin: &mut dyn SwitchInput, name: &str) -> bool {
    match pin.is_active() {
        Ok(active) => active,
        Err(e) => {
            log::warn!("[inertial] {} switch read failed, treating as inactive: {}", name, e);
            false
        }
    }
}
