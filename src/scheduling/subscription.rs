//! A pending notification and the caller's handle onto it.
//!
//! `Subscription` is owned by the pending table (or by the worker's snapshot while it is being
//! processed) and is consumed by value when it fires or is disposed, so each observer sees
//! exactly one terminal call. The caller keeps a `SubscriptionHandle`, which shares a small
//! state word with the subscription and can cancel it until the worker gets there first.
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::sync::Arc;

use tracing::error;

use super::TimeObserver;

// state word: no bits set while pending; DONE is set once the observer has had its terminal call
const PENDING: u8 = 0;
const CANCELLED: u8 = 0b01;
const DONE: u8 = 0b10;

/// What happened when the worker reached a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Fired,
    /// The handle was cancelled first; the observer was disposed instead.
    Cancelled,
    /// The observer's callback panicked. The panic was contained.
    Panicked,
}

pub struct Subscription {
    target_time: u64,
    observer: Box<dyn TimeObserver>,
    state: Arc<AtomicU8>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("target_time", &self.target_time)
            .field("state", &self.state.load(Acquire))
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// New pending subscription due at the absolute `target_time`, plus its handle.
    pub fn new(target_time: u64, observer: Box<dyn TimeObserver>) -> (Self, SubscriptionHandle) {
        let state = Arc::new(AtomicU8::new(PENDING));
        let handle = SubscriptionHandle {
            target_time,
            state: Arc::clone(&state),
        };
        (
            Self {
                target_time,
                observer,
                state,
            },
            handle,
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Acquire) & CANCELLED != 0
    }

    /// Notify the observer with `elapsed`, unless the handle got there first.
    pub fn fire(self, elapsed: u64) -> Delivery {
        if self
            .state
            .compare_exchange(PENDING, DONE, AcqRel, Acquire)
            .is_err()
        {
            self.dispose();
            return Delivery::Cancelled;
        }
        let target = self.target_time;
        match catch_unwind(AssertUnwindSafe(|| self.observer.notify(elapsed))) {
            Ok(()) => Delivery::Fired,
            Err(panic) => {
                error!(
                    target_time = target,
                    elapsed,
                    reason = panic_message(&*panic),
                    "observer panicked while being notified"
                );
                Delivery::Panicked
            }
        }
    }

    /// Drop the subscription without firing it.
    pub fn dispose(self) {
        self.state.fetch_or(DONE, AcqRel);
        let target = self.target_time;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.observer.dispose())) {
            error!(
                target_time = target,
                reason = panic_message(&*panic),
                "observer panicked while being disposed"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Caller-side handle returned by `SpinWaitScheduler::subscribe`.
///
/// Dropping the handle does nothing; the notification still fires. Call `cancel` to stop it.
/// A cancelled subscription stays in its bucket until the worker reaches it (or shutdown drains
/// it), at which point its observer is disposed rather than notified.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    target_time: u64,
    state: Arc<AtomicU8>,
}

impl SubscriptionHandle {
    /// Absolute clock value the notification is due at.
    pub fn target_time(&self) -> u64 {
        self.target_time
    }

    /// Cancel the notification. Returns `false` if it already fired, was disposed, or was
    /// cancelled before.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, AcqRel, Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Acquire) & CANCELLED != 0
    }

    /// True once the subscription has fired or been disposed.
    pub fn is_finished(&self) -> bool {
        self.state.load(Acquire) & DONE != 0
    }
}
