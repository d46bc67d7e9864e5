//! # Ledger Time
//!
//! Settlement is time-indexed, so every ledger reads "now" through a
//! [`Clock`]. Production uses [`SystemClock`]; tests use [`ManualClock`]
//! and crank it forward by hand, which makes interest amounts exact.
//!
//! Timestamps are unix seconds. Sub-second precision buys nothing when
//! rates are quoted per second.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Source of the current ledger time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in unix seconds.
    fn now(&self) -> u64;
}

/// Wall-clock time via `chrono`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        // Pre-1970 clocks clamp to zero rather than wrapping.
        Utc::now().timestamp().max(0) as u64
    }
}

/// A clock that only moves when told to.
///
/// Shared between ledgers in tests (`Arc<ManualClock>`) so that "the same
/// moment" means the same thing everywhere.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward by `secs` and returns the new time.
    pub fn advance(&self, secs: u64) -> u64 {
        self.now.fetch_add(secs, Ordering::SeqCst) + secs
    }

    /// Jumps to an absolute time. Going backwards is allowed so tests can
    /// provoke clock-regression errors; ledgers will refuse to settle.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
