use std::time::{Duration, Instant};

/// Availability change of one sensor stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    BecameUnavailable,
    Recovered { failed_polls: u64 },
}

/// Tracks whether a stream is delivering, and logs only when that changes
/// so a dead sensor does not flood the log once per tick.
#[derive(Clone, Debug)]
pub struct StreamHealth {
    name: &'static str,
    healthy: bool,
    consecutive_failures: u64,
    last_success: Instant,
}

impl StreamHealth {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            healthy: true,
            consecutive_failures: 0,
            last_success: Instant::now(),
        }
    }

    pub fn record_success(&mut self) -> Option<Transition> {
        self.last_success = Instant::now();
        let failed_polls = std::mem::take(&mut self.consecutive_failures);
        if self.healthy {
            return None;
        }
        self.healthy = true;
        log::info!("[{}] stream recovered after {} failed poll(s)", self.name, failed_polls);
        Some(Transition::Recovered { failed_polls })
    }

    pub fn record_failure(&mut self, reason: &dyn std::fmt::Display) -> Option<Transition> {
        self.consecutive_failures += 1;
        if !self.healthy {
            log::debug!("[{}] still unavailable: {}", self.name, reason);
            return None;
        }
        self.healthy = false;
        log::error!("[{}] stream unavailable: {}", self.name, reason);
        Some(Transition::BecameUnavailable)
    }

    /// Mark the stream unavailable once nothing has arrived for `limit`.
    /// A stream already down is left alone so quiet polls do not count as failures.
    pub fn check_silence(&mut self, limit: Duration) -> Option<Transition> {
        let silent_for = self.time_since_last_success();
        if !self.healthy || silent_for < limit {
            return None;
        }
        self.record_failure(&format!("nothing received for {:?}", silent_for))
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    pub fn time_since_last_success(&self) -> Duration {
        self.last_success.elapsed()
    }
}
