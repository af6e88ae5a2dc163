//! Monotonic nanosecond time sources consumed by the scheduler.
//!
//! The scheduler only ever reads a clock. `MonotonicClock` follows wall time from the moment
//! it is created, while `ManualClock` is a virtual clock that only moves when told to, which
//! makes timing behaviour deterministic in simulations and tests.
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic counter of elapsed nanoseconds. Must never decrease.
pub trait Clock: Send + Sync {
    fn elapsed(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn elapsed(&self) -> u64 {
        (**self).elapsed()
    }
}

/// Real time, measured in nanoseconds since construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> u64 {
        // saturates after ~584 years
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Virtual clock advanced explicitly by its owner.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock forward by `nanos`, returning the new elapsed time.
    pub fn advance(&self, nanos: u64) -> u64 {
        let prev = self
            .now
            .fetch_update(AcqRel, Acquire, |now| Some(now.saturating_add(nanos)))
            .unwrap_or_else(|now| now);
        prev.saturating_add(nanos)
    }

    /// Move the clock to `time`. Earlier values are ignored, the clock never goes backwards.
    pub fn advance_to(&self, time: u64) -> u64 {
        self.now.fetch_max(time, AcqRel).max(time)
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> u64 {
        self.now.load(Acquire)
    }
}
