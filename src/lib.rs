//! Deadline-ordered event scheduling on a monotonic nanosecond clock.
//!
//! Callers register one-shot notifications that fire once a [`clock::Clock`]
//! reaches a target value. A single background worker drains the pending
//! table, reschedules what is not yet due, and spin-waits the residual
//! nanoseconds before firing what is.
use std::fmt::Display;

use thiserror::Error;

pub mod clock;
pub mod scheduling;
pub mod sync;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use scheduling::{
    config::SchedulerConfig,
    spin::SpinWaitScheduler,
    subscription::SubscriptionHandle,
    FnObserver, TimeObserver,
};

/// Wrapper type for `std::io::Error`
#[derive(Debug, Error)]
pub struct IoError(std::io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl Eq for IoError {}
impl Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        IoError(err)
    }
}

/// Error type for the scheduler and its collaborators
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpindleError {
    #[error("Invalid scheduler configuration: {description}")]
    InvalidConfig { description: String },
    #[error("I/O error while starting the scheduler worker {:?}", err)]
    Io {
        #[from]
        err: IoError,
    },
    #[error("Scheduler has been shut down, no further subscriptions are accepted")]
    ShutDown,
}
