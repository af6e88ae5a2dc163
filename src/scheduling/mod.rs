//! Deadline scheduling primitives.
//!
//! A `SpinWaitScheduler` owns a `PendingTable` keyed by absolute target time and a single worker
//! thread that drains it. Anything that wants to be told when the clock passes a deadline
//! implements `TimeObserver`.
use std::sync::Arc;

pub mod config;
pub mod pending;
pub mod spin;
pub mod subscription;

/// Receiver of a scheduled notification.
///
/// Exactly one of `notify` or `dispose` is called for each subscription: `notify` when the
/// deadline has passed, `dispose` when the subscription is dropped without firing (cancelled, or
/// still pending at shutdown). Both run on the scheduler's worker thread, or on the caller's
/// thread when a subscribe races with shutdown.
pub trait TimeObserver: Send + Sync {
    /// Called with the clock's elapsed time at the moment of firing.
    fn notify(&self, elapsed: u64);

    fn dispose(&self) {}
}

impl<T: TimeObserver + ?Sized> TimeObserver for Arc<T> {
    fn notify(&self, elapsed: u64) {
        (**self).notify(elapsed)
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

impl<T: TimeObserver + ?Sized> TimeObserver for Box<T> {
    fn notify(&self, elapsed: u64) {
        (**self).notify(elapsed)
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

/// Adapts a closure into a `TimeObserver` whose disposal is a no-op.
pub struct FnObserver<F>(pub F);

impl<F> TimeObserver for FnObserver<F>
where
    F: Fn(u64) + Send + Sync,
{
    fn notify(&self, elapsed: u64) {
        (self.0)(elapsed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Observers that record what happened to them.
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::SeqCst;

    use parking_lot::Mutex;

    use super::TimeObserver;

    #[derive(Debug, Default)]
    pub struct Recorder {
        pub fired: Mutex<Vec<u64>>,
        pub disposed: AtomicUsize,
    }

    impl Recorder {
        pub fn fire_count(&self) -> usize {
            self.fired.lock().len()
        }

        pub fn dispose_count(&self) -> usize {
            self.disposed.load(SeqCst)
        }
    }

    impl TimeObserver for Recorder {
        fn notify(&self, elapsed: u64) {
            self.fired.lock().push(elapsed);
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, SeqCst);
        }
    }
}
