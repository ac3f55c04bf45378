//! # Injectable time source.
//!
//! The engine never calls `Utc::now()` directly: every component that needs
//! wall-clock time holds a [`ClockRef`] and asks it. Production code uses
//! [`SystemClock`]; tests drive [`ManualClock`] to make cron comparisons and
//! lifecycle timestamps deterministic.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Shared handle to a clock implementation.
pub type ClockRef = Arc<dyn Clock>;

/// Wall-clock time source.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current wall-clock time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests.
///
/// Starts at a fixed instant and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// Moves the clock forward by `dur`.
    pub fn advance(&self, dur: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += dur;
    }

    /// Jumps the clock to an absolute instant (may move backwards).
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
