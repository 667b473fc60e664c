//! Shared building blocks used across the volbroker crates: error context
//! helpers, an injectable clock, and exponential backoff with retry.

pub mod backoff;
pub mod clock;
pub mod error;

pub use {
    backoff::{BackOff, BackoffConfig, ExponentialBackoff, RetryError, retry, retry_notify},
    clock::{Clock, FakeClock, SharedClock, SystemClock},
    error::FromMessage,
};
