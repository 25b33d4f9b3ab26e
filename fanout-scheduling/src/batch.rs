//! Runs a whole batch of units of work to completion.

use std::fmt;
use std::future::Future;

use tokio::task::JoinSet;

use crate::accounting::{Outcome, RunAccounting, RunClock, Tally};
use crate::concurrency::ConcurrencyLimiter;
use crate::error::Result;

/// Runs every unit of work in `units` and waits until all of them have finished.
///
/// Each unit runs on its own task while holding a permit of `limiter`. The permit is
/// acquired before the next unit is pulled from the iterator, so a lazy source is never
/// materialized further than the limiter's capacity.
///
/// Failing or panicking units are counted and never abort their siblings. The returned
/// accounting always covers the full batch: `requested_count` is the number of units the
/// iterator yielded.
///
/// # Errors
///
/// Only fails if the limiter is unusable, which is a defect in the scheduling setup.
pub async fn gather<I, F, T, E>(units: I, limiter: &ConcurrencyLimiter) -> Result<RunAccounting>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let clock = RunClock::start();
    let mut tally = Tally::default();
    let mut in_flight = JoinSet::new();

    let mut units = units.into_iter();
    loop {
        let permit = limiter.acquire().await?;
        let Some(unit) = units.next() else {
            break;
        };

        tally.requested += 1;
        in_flight.spawn(async move {
            let outcome = Outcome::of(unit.await);
            drop(permit);
            outcome
        });

        // Reap whatever already finished so the set only tracks running units.
        while let Some(joined) = in_flight.try_join_next() {
            tally.record(joined.unwrap_or_else(|error| Outcome::panicked(&error)));
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        tally.record(joined.unwrap_or_else(|error| Outcome::panicked(&error)));
    }

    let accounting = clock.finish(tally);
    tracing::info!(
        requested = accounting.requested_count(),
        failures = accounting.failure_count(),
        duration = ?accounting.duration(),
        "batch finished"
    );

    Ok(accounting)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn empty_batch() {
        let limiter = ConcurrencyLimiter::new(4).unwrap();
        let units = std::iter::empty::<std::future::Ready<Result<(), String>>>();

        let accounting = gather(units, &limiter).await.unwrap();

        assert_eq!(accounting.requested_count(), 0);
        assert_eq!(accounting.failure_count(), 0);
        assert!(accounting.end_time() >= accounting.start_time());
    }

    #[tokio::test]
    async fn counts_failures_without_aborting_siblings() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let units = (0..20).map(|i| async move {
            tokio::task::yield_now().await;
            if i % 4 == 0 {
                Err(format!("unit {i} failed"))
            } else {
                Ok(i)
            }
        });

        let accounting = gather(units, &limiter).await.unwrap();

        assert_eq!(accounting.requested_count(), 20);
        assert_eq!(accounting.failure_count(), 5);
        assert_eq!(accounting.success_count(), 15);
        assert_eq!(limiter.used_permits(), 0);
    }

    #[tokio::test]
    async fn panics_count_as_failures() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let units = (0..4).map(|i| async move {
            if i == 2 {
                panic!("unit {i} exploded");
            }
            Ok::<_, String>(())
        });

        let accounting = gather(units, &limiter).await.unwrap();

        assert_eq!(accounting.requested_count(), 4);
        assert_eq!(accounting.failure_count(), 1);
        assert_eq!(limiter.used_permits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_slowest_unit() {
        let limiter = ConcurrencyLimiter::new(10).unwrap();
        let units = [10, 300, 20].map(|millis| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, String>(())
        });

        let accounting = gather(units, &limiter).await.unwrap();

        assert_eq!(accounting.requested_count(), 3);
        assert_eq!(accounting.duration(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn source_is_pulled_only_up_to_capacity() {
        let limiter = ConcurrencyLimiter::new(4).unwrap();
        let pulled = AtomicUsize::new(0);
        let units = (0..1000).map(|_| {
            pulled.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, String>(())
            }
        });

        let run = tokio::time::timeout(Duration::from_millis(500), gather(units, &limiter)).await;

        assert!(run.is_err());
        assert_eq!(pulled.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_serializes_units() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let units = (0..4).map(|_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(())
        });

        let accounting = gather(units, &limiter).await.unwrap();

        assert_eq!(accounting.duration(), Duration::from_millis(200));
    }
}
