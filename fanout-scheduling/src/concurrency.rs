//! Bounded admission of units of work.
//!
//! A [`ConcurrencyLimiter`] hands out at most `capacity` [`ConcurrencyPermit`]s at a
//! time. Permits are returned when dropped, which also wakes anyone waiting for the
//! limiter to become idle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};

/// How often [`ConcurrencyLimiter::run_emitter`] reports the in-flight count.
pub const EMITTER_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct LimiterState {
    permits: Semaphore,
    capacity: usize,
    idle: Notify,
}

impl LimiterState {
    fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }
}

/// Caps the number of units of work running at the same time.
///
/// Clones share one permit pool. Waiters are admitted in FIFO order, so nobody starves
/// as long as permit holders eventually finish.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    state: Arc<LimiterState>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter admitting up to `capacity` units at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroConcurrency`] for a capacity of zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ZeroConcurrency);
        }

        let state = LimiterState {
            permits: Semaphore::new(capacity),
            capacity,
            idle: Notify::new(),
        };
        Ok(Self {
            state: Arc::new(state),
        })
    }

    /// Maximum number of permits held at once.
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Waits for a free permit and takes it.
    pub async fn acquire(&self) -> Result<ConcurrencyPermit> {
        self.state
            .permits
            .acquire()
            .await
            .map_err(|_| Error::LimiterClosed)?
            .forget();

        Ok(self.permit())
    }

    /// Takes a permit if one is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AtCapacity`] when every permit is held.
    pub fn try_acquire(&self) -> Result<ConcurrencyPermit> {
        self.state
            .permits
            .try_acquire()
            .map_err(|_| Error::AtCapacity)?
            .forget();

        Ok(self.permit())
    }

    /// Awaits `unit` while holding a permit and returns its output untouched.
    ///
    /// The permit goes back to the pool when `unit` resolves, panics, or is dropped.
    pub async fn run<F>(&self, unit: F) -> Result<F::Output>
    where
        F: Future,
    {
        let _permit = self.acquire().await?;
        Ok(unit.await)
    }

    /// Number of permits currently held.
    pub fn used_permits(&self) -> usize {
        self.state.in_flight()
    }

    /// Resolves once no permit is held anymore.
    pub async fn wait_all(&self) {
        loop {
            let returned = self.state.idle.notified();
            if self.state.in_flight() == 0 {
                break;
            }
            returned.await;
        }
    }

    /// Calls `emit` with the number of held permits every [`EMITTER_INTERVAL`].
    ///
    /// The first report is immediate. Never returns; race it against the run it reports
    /// on.
    pub async fn run_emitter<F, Fut>(&self, mut emit: F)
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticks = tokio::time::interval(EMITTER_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;
            emit(self.state.in_flight()).await;
        }
    }

    fn permit(&self) -> ConcurrencyPermit {
        ConcurrencyPermit {
            state: Arc::clone(&self.state),
        }
    }
}

/// A held slot of a [`ConcurrencyLimiter`], returned on drop.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    state: Arc<LimiterState>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.state.permits.add_permits(1);
        self.state.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        let result = ConcurrencyLimiter::new(0);
        assert!(matches!(result, Err(Error::ZeroConcurrency)));
    }

    #[test]
    fn permits_are_counted_until_dropped() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let clone = limiter.clone();

        let first = limiter.try_acquire().unwrap();
        let second = clone.try_acquire().unwrap();
        assert_eq!(limiter.used_permits(), 2);
        assert_eq!(clone.used_permits(), 2);

        drop(second);
        assert_eq!(limiter.used_permits(), 1);
        drop(first);
        assert_eq!(limiter.used_permits(), 0);
        assert_eq!(limiter.capacity(), 3);
    }

    #[test]
    fn try_acquire_fails_when_full() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let held = limiter.try_acquire().unwrap();
        assert!(matches!(limiter.try_acquire(), Err(Error::AtCapacity)));

        drop(held);
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn acquire_is_admitted_after_release() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let held = limiter.acquire().await.unwrap();

        let mut next = Box::pin(limiter.acquire());
        assert!(futures::poll!(&mut next).is_pending());

        drop(held);
        assert!(futures::poll!(&mut next).is_ready());
    }

    #[tokio::test]
    async fn run_passes_errors_through() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();

        let output = limiter.run(async { Err::<(), _>("boom") }).await.unwrap();

        assert_eq!(output, Err("boom"));
        assert_eq!(limiter.used_permits(), 0);
    }

    #[tokio::test]
    async fn run_returns_permit_after_panic() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();

        let handle = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.run(async { panic!("unit of work exploded") }).await }
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(limiter.used_permits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn emitter_reports_every_interval() {
        let limiter = ConcurrencyLimiter::new(4).unwrap();
        let _held = limiter.try_acquire().unwrap();
        let reports = Mutex::new(Vec::new());

        let emitter = limiter.run_emitter(|in_flight| {
            reports.lock().unwrap().push(in_flight);
            async {}
        });
        let window = tokio::time::sleep(EMITTER_INTERVAL * 5 / 2);

        tokio::select! {
            _ = emitter => unreachable!("emitter never returns"),
            _ = window => {}
        }

        assert_eq!(*reports.lock().unwrap(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn wait_all_needs_every_permit_back() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let first = limiter.try_acquire().unwrap();
        let second = limiter.try_acquire().unwrap();

        let mut idle = Box::pin(limiter.wait_all());

        drop(first);
        assert!(futures::poll!(&mut idle).is_pending());

        drop(second);
        assert!(futures::poll!(&mut idle).is_ready());
    }

    #[tokio::test]
    async fn wait_all_on_idle_limiter() {
        let limiter = ConcurrencyLimiter::new(5).unwrap();
        assert!(futures::poll!(Box::pin(limiter.wait_all())).is_ready());
    }
}
