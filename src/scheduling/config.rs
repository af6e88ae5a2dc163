//! Knobs for the spin-wait scheduler.
use serde::{Deserialize, Serialize};

use crate::SpindleError;

pub const DEFAULT_WORKER_THREAD_NAME: &str = "spindle-scheduler";
pub const DEFAULT_SPIN_WINDOW_NS: u64 = 1_000;
pub const DEFAULT_SPIN_WAIT_ITERATIONS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name given to the background worker thread. Diagnostics only.
    pub worker_thread_name: String,
    /// An entry whose target time is within this many nanoseconds of the clock counts as
    /// elapsed and is spin-waited to, rather than rescheduled.
    pub acceptable_spin_wait_period_ns: u64,
    /// Busy-wait cycles per spin burst while waiting out the residual time before firing.
    pub spin_wait_iterations: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_owned(),
            acceptable_spin_wait_period_ns: DEFAULT_SPIN_WINDOW_NS,
            spin_wait_iterations: DEFAULT_SPIN_WAIT_ITERATIONS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    pub fn with_spin_window(mut self, nanos: u64) -> Self {
        self.acceptable_spin_wait_period_ns = nanos;
        self
    }

    pub fn with_spin_wait_iterations(mut self, iterations: u32) -> Self {
        self.spin_wait_iterations = iterations;
        self
    }

    /// Reject configurations the worker cannot start with.
    pub fn validate(&self) -> Result<(), SpindleError> {
        if self.worker_thread_name.is_empty() {
            return Err(SpindleError::InvalidConfig {
                description: "worker_thread_name must not be empty".to_owned(),
            });
        }
        if self.worker_thread_name.contains('\0') {
            return Err(SpindleError::InvalidConfig {
                description: format!(
                    "worker_thread_name {:?} contains a NUL byte",
                    self.worker_thread_name
                ),
            });
        }
        if self.spin_wait_iterations == 0 {
            return Err(SpindleError::InvalidConfig {
                description: "spin_wait_iterations must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}
