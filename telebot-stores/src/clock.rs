//! Time source shared by the Redis emulation and time-aware components.

use std::sync::Arc;

use parking_lot::Mutex;

/// Current time as fractional unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Clock that only moves when told to; tests use it to emulate waiting.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    /// 2023-11-14T22:13:20Z, an arbitrary but realistic starting point.
    pub const DEFAULT_START: f64 = 1_700_000_000.0;

    pub fn new() -> Arc<Self> {
        Self::starting_at(Self::DEFAULT_START)
    }

    pub fn starting_at(now: f64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
