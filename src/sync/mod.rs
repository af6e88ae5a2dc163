//! Blocking synchronization primitives shared by the scheduler and its callers.
pub mod signal;
