//! Time source abstraction.
//!
//! Components that wait (retry loops, the sync timer) take a [`SharedClock`]
//! instead of calling `tokio::time` directly so tests can fast-forward.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {async_trait::async_trait, tokio::time::Instant};

/// A monotonic clock that can also suspend the current task.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by the tokio timer.
///
/// Uses `tokio::time::Instant`, so a runtime started with paused time
/// advances it automatically.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock whose `sleep` returns immediately after advancing `now`.
///
/// Every requested sleep is recorded so retry schedules can be asserted.
#[derive(Debug)]
pub struct FakeClock {
    origin: Instant,
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.lock().offset += by;
    }

    /// Durations passed to [`Clock::sleep`], in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().offset
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.offset += duration;
        state.sleeps.push(duration);
    }
}
