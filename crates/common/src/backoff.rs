//! Exponential backoff and retry.
//!
//! [`ExponentialBackoff`] is a plain value: it never reads the time itself,
//! every call takes `now` from the caller. [`retry_notify`] drives it with a
//! [`Clock`], so tests can run whole retry schedules instantly.

use std::{future::Future, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tokio::time::Instant,
};

use crate::clock::Clock;

/// Parameters of an exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub multiplier: f64,
    /// Total time budget since the last reset. Zero means unbounded.
    pub max_elapsed: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// Outcome of [`ExponentialBackoff::next_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackOff {
    Wait(Duration),
    Stop,
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig, now: Instant) -> Self {
        Self {
            config,
            current: config.initial_interval,
            started: now,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub fn reset(&mut self, now: Instant) {
        self.current = self.config.initial_interval;
        self.started = now;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Next interval to wait, or [`BackOff::Stop`] once the budget is spent.
    ///
    /// An interval that would carry the elapsed time past `max_elapsed` is
    /// shortened to end exactly on the budget boundary.
    pub fn next_backoff(&mut self, now: Instant) -> BackOff {
        let bounded = !self.config.max_elapsed.is_zero();
        let elapsed = self.elapsed(now);
        if bounded && elapsed >= self.config.max_elapsed {
            return BackOff::Stop;
        }

        let mut interval = self.current;
        if bounded && elapsed.saturating_add(interval) > self.config.max_elapsed {
            interval = self.config.max_elapsed - elapsed;
        }
        self.current = grow(self.current, self.config.multiplier);
        BackOff::Wait(interval)
    }
}

/// `current * multiplier`, saturating at [`Duration::MAX`].
fn grow(current: Duration, multiplier: f64) -> Duration {
    Duration::try_from_secs_f64(current.as_secs_f64() * multiplier.max(1.0))
        .unwrap_or(Duration::MAX)
}

/// Failure reported by a retried operation.
///
/// `Permanent` errors end the retry loop at once; `Transient` ones are
/// retried until the backoff stops.
#[derive(Debug)]
pub enum RetryError<E> {
    Transient(E),
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Transient(e) | Self::Permanent(e) => e,
        }
    }
}

/// Retry `operation` until it succeeds, fails permanently, or the backoff
/// stops. Returns the last error in the latter two cases.
pub async fn retry<T, E, F, Fut>(
    clock: &dyn Clock,
    backoff: &mut ExponentialBackoff,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
{
    retry_notify(clock, backoff, operation, |_: &E, _| {}).await
}

/// Like [`retry`], calling `notify(err, wait)` before every sleep.
pub async fn retry_notify<T, E, F, Fut, N>(
    clock: &dyn Clock,
    backoff: &mut ExponentialBackoff,
    mut operation: F,
    mut notify: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
    N: FnMut(&E, Duration),
{
    backoff.reset(clock.now());
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Permanent(err)) => return Err(err),
            Err(RetryError::Transient(err)) => err,
        };

        match backoff.next_backoff(clock.now()) {
            BackOff::Stop => return Err(err),
            BackOff::Wait(wait) => {
                notify(&err, wait);
                clock.sleep(wait).await;
            },
        }
    }
}
