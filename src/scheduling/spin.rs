//! Threaded spin-wait scheduler.
//!
//! One dedicated worker thread owns the timing loop. While the pending table is empty it parks
//! on a wake `Signal`. Otherwise it takes a snapshot of the table and splits it at
//! `clock + acceptable_spin_wait_period_ns`. Buckets beyond that horizon go straight back into
//! the table. Buckets inside it are handled one timestamp at a time: the worker spins in bursts
//! of `spin_wait_iterations` until the clock reaches the bucket's target time, then notifies
//! every observer in it with the current elapsed time.
//!
//! The worker only parks when the table is empty. While anything is pending, even a single
//! far-future entry, it keeps cycling snapshot and reschedule with a `yield_now` between
//! cycles that fire nothing, so it occupies a core until the table drains.
//!
//! The spin assumes a live clock. If the clock stops advancing short of a due target, the
//! worker spins until it moves, and a shutdown requested meanwhile waits with it.
use std::hint::spin_loop;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::config::SchedulerConfig;
use super::pending::PendingTable;
use super::subscription::{Delivery, Subscription, SubscriptionHandle};
use super::TimeObserver;
use crate::clock::Clock;
use crate::sync::signal::Signal;
use crate::{IoError, SpindleError};

struct Shared {
    table: PendingTable,
    wake: Signal,
    stopping: AtomicBool,
    closed: AtomicBool, // set once the worker has left its loop; no more firing after this
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

/// Deadline scheduler backed by a single spin-waiting worker thread.
pub struct SpinWaitScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl SpinWaitScheduler {
    /// Validate `config` and start the worker thread.
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self, SpindleError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            table: PendingTable::new(),
            wake: Signal::new(),
            stopping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            clock,
            config,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(shared.config.worker_thread_name.clone())
            .spawn(move || worker_shared.run())
            .map_err(IoError::from)?;
        let worker_id = worker.thread().id();

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    /// Notify `observer` once the clock reaches `now + delay_ns`.
    ///
    /// Rejected with `SpindleError::ShutDown` once the worker has stopped; the observer is
    /// disposed before returning. A subscribe that races with shutdown is still accepted, and
    /// its observer is disposed by whichever side drains it.
    pub fn subscribe(
        &self,
        observer: impl TimeObserver + 'static,
        delay_ns: u64,
    ) -> Result<SubscriptionHandle, SpindleError> {
        let target_time = self.shared.clock.elapsed().saturating_add(delay_ns);
        let (subscription, handle) = Subscription::new(target_time, Box::new(observer));

        if self.shared.closed.load(SeqCst) {
            warn!(target_time, "subscribe rejected, scheduler is shut down");
            subscription.dispose();
            return Err(SpindleError::ShutDown);
        }

        if self.shared.table.insert(target_time, subscription) {
            self.shared.wake.set();
        }

        if self.shared.closed.load(SeqCst) {
            // the worker's final drain may have run before our insert landed
            self.shared.dispose_pending();
        }
        Ok(handle)
    }

    /// Stop the worker and block until every pending subscription has been disposed.
    ///
    /// There is no timeout. Calling it again is a no-op; calling it from inside an observer
    /// callback only requests the stop, since the worker cannot wait on itself.
    pub fn shutdown(&self) {
        self.shared.stopping.store(true, SeqCst);
        self.shared.wake.set();
        if thread::current().id() == self.worker_id {
            return;
        }

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!(
                    thread = %self.shared.config.worker_thread_name,
                    "scheduler worker panicked"
                );
            }
        }
    }

    /// Approximate number of subscriptions waiting in the table.
    pub fn pending(&self) -> usize {
        self.shared.table.len()
    }

    /// True once the worker has stopped firing.
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(SeqCst)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}

impl Drop for SpinWaitScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run(&self) {
        debug!(
            thread = %self.config.worker_thread_name,
            spin_window_ns = self.config.acceptable_spin_wait_period_ns,
            spin_wait_iterations = self.config.spin_wait_iterations,
            "scheduler worker started"
        );
        while !self.stopping.load(SeqCst) {
            if self.table.is_empty() {
                self.wake.wait();
                continue;
            }
            if self.drain() == 0 {
                thread::yield_now();
            }
        }
        self.closed.store(true, SeqCst);
        let disposed = self.dispose_pending();
        debug!(
            thread = %self.config.worker_thread_name,
            disposed,
            "scheduler worker stopped"
        );
    }

    /// One snapshot, reschedule and fire cycle. Returns how many buckets were handled.
    fn drain(&self) -> usize {
        let snapshot = self.table.take_snapshot_and_clear();
        if snapshot.is_empty() {
            return 0;
        }
        let horizon = self
            .clock
            .elapsed()
            .saturating_add(self.config.acceptable_spin_wait_period_ns);
        let (due, later) = snapshot.partition(horizon);

        let mut rescheduled = 0;
        for (time, subs) in later {
            let (cancelled, live): (Vec<_>, Vec<_>) =
                subs.into_iter().partition(Subscription::is_cancelled);
            cancelled.into_iter().for_each(Subscription::dispose);
            rescheduled += live.len();
            self.table.insert_bucket(time, live);
        }

        let buckets = due.bucket_count();
        for (time, subs) in due {
            self.fire_bucket(time, subs);
        }
        trace!(buckets, rescheduled, "drain cycle complete");
        buckets
    }

    fn fire_bucket(&self, target_time: u64, subs: Vec<Subscription>) {
        if subs.iter().all(Subscription::is_cancelled) {
            subs.into_iter().for_each(Subscription::dispose);
            return;
        }
        self.spin_until(target_time);

        let elapsed = self.clock.elapsed();
        let (mut fired, mut cancelled, mut panicked) = (0usize, 0usize, 0usize);
        for sub in subs {
            match sub.fire(elapsed) {
                Delivery::Fired => fired += 1,
                Delivery::Cancelled => cancelled += 1,
                Delivery::Panicked => panicked += 1,
            }
        }
        trace!(
            target_time,
            elapsed,
            late_by = elapsed.saturating_sub(target_time),
            fired,
            cancelled,
            panicked,
            "fired bucket"
        );
    }

    fn spin_until(&self, target_time: u64) {
        let iterations = self.config.spin_wait_iterations;
        while self.clock.elapsed() < target_time {
            for _ in 0..iterations {
                spin_loop();
            }
        }
    }

    /// Take whatever is left in the table and dispose it without firing.
    fn dispose_pending(&self) -> usize {
        let snapshot = self.table.take_snapshot_and_clear();
        let disposed = snapshot.len();
        for (_, subs) in snapshot {
            subs.into_iter().for_each(Subscription::dispose);
        }
        disposed
    }
}
