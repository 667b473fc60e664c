use std::future::Future;

use {
    tracing::debug,
    volbroker_common::{
        BackoffConfig, ExponentialBackoff, RetryError, SharedClock, SystemClock, retry_notify,
    },
};

use crate::error::{Error, Result};

/// How plugin calls are retried when the driver cannot be reached.
///
/// Only transient failures ([`Error::is_transient`]) are retried. Anything
/// the driver actually answered is returned as is.
#[derive(Clone)]
pub struct RetryPolicy {
    pub backoff: BackoffConfig,
    pub clock: SharedClock,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            clock: SystemClock::shared(),
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: BackoffConfig, clock: SharedClock) -> Self {
        Self { backoff, clock }
    }

    pub(crate) async fn run<T, F, Fut>(&self, driver: &str, call: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(self.backoff, self.clock.now());
        retry_notify(
            self.clock.as_ref(),
            &mut backoff,
            || {
                let attempt = operation();
                async move {
                    attempt.await.map_err(|err| {
                        if err.is_transient() {
                            RetryError::Transient(err)
                        } else {
                            RetryError::Permanent(err)
                        }
                    })
                }
            },
            |err: &Error, wait| {
                debug!(driver, call, error = %err, ?wait, "plugin unreachable, retrying");
            },
        )
        .await
    }
}
