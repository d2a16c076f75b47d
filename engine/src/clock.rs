//! Server time source.
//!
//! Every version bump, movement and cursor advance is stamped with server
//! time taken from a [`Clock`]. The engine only requires that the clock never
//! goes backwards; wall-clock steps are absorbed by [`SystemClock`].

use crate::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of non-decreasing server time in milliseconds since the epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock, clamped so it never runs backwards.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let previous = self.last.fetch_max(wall, Ordering::AcqRel);
        previous.max(wall)
    }
}

/// Clock controlled by the caller. Used in tests to pin server time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock forward. Setting an earlier time is ignored.
    pub fn set(&self, now: Timestamp) {
        self.now.fetch_max(now, Ordering::AcqRel);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }
}
