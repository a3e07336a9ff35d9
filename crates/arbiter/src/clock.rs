//! Time sources for the engine
//!
//! The engine never calls `Utc::now()` directly. Detection windows, event
//! timestamps and buffered fire times all come from a [`Clock`], so tests can
//! run on tokio's paused clock and see one consistent timeline.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock origin advanced by tokio's monotonic clock.
///
/// Under `tokio::time::pause()` this clock only moves when the runtime's
/// virtual time moves, which keeps event timestamps aligned with timer firings.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin_wall: DateTime<Utc>,
    origin_instant: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Start the clock at a fixed wall time.
    pub fn anchored_at(origin_wall: DateTime<Utc>) -> Self {
        Self {
            origin_wall,
            origin_instant: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.origin_instant.elapsed()
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.origin_instant.elapsed()) {
            Ok(elapsed) => self.origin_wall + elapsed,
            Err(_) => self.origin_wall,
        }
    }
}

/// Manually driven clock for synchronous tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(by) = chrono::Duration::from_std(by) {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
