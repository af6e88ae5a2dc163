//! Auto-reset wake signal.
//!
//! `Signal` is a boolean latch guarded by a `parking_lot` mutex. `set` raises it and wakes one
//! waiter, `wait` blocks until it is raised and lowers it again on the way out. A `set` that
//! happens before anyone waits is not lost: the next `wait` returns immediately.
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake one waiter.
    pub fn set(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cond.notify_one();
    }

    /// Block until the signal is raised, then lower it.
    pub fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.cond.wait(&mut raised);
        }
        *raised = false;
    }

    pub fn is_set(&self) -> bool {
        *self.raised.lock()
    }
}
