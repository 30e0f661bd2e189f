//! Clock injection point for expiry and lock checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait TimeProvider: Send + Sync {
    /// Seconds since the UNIX epoch.
    fn now(&self) -> u64;
}

#[derive(Default)]
pub struct WallClock;

impl TimeProvider for WallClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Test clock advanced by hand.
#[derive(Default)]
pub struct ManualTime {
    seconds: AtomicU64,
}

impl ManualTime {
    pub fn new(seconds: u64) -> Self {
        Self { seconds: AtomicU64::new(seconds) }
    }

    pub fn set(&self, seconds: u64) {
        self.seconds.store(seconds, Ordering::Relaxed);
    }

    pub fn advance(&self, delta: u64) {
        self.seconds.fetch_add(delta, Ordering::Relaxed);
    }
}

impl TimeProvider for ManualTime {
    fn now(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }
}
