//! Repeated rounds of work under a global time budget.
//!
//! The budget is tracked as an absolute deadline, `start + timeout`, on the monotonic
//! clock. The remaining budget at any point is the time left until that deadline, so
//! launch overhead and round durations are each charged exactly once and the budget can
//! only shrink. A new round starts only while some budget remains.
//!
//! Outcomes are tallied exclusively by the scheduler while it joins the round's tasks.
//! When the deadline fires, the round's remaining tasks are aborted and their results are
//! never observed, so late completions cannot touch the returned accounting.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::accounting::{Outcome, RunAccounting, RunClock, Tally};
use crate::concurrency::ConcurrencyLimiter;
use crate::error::Result;

/// Stand-in deadline for timeouts too large to represent on the monotonic clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Issues rounds of `n_requests` fresh units until `timeout` has elapsed.
///
/// Every unit is built by a separate call to `make_unit` and runs on its own task while
/// holding a permit of `limiter`. Each round is awaited for at most the remaining budget:
///
/// - If the round completes in time, the next round starts as long as budget remains.
/// - If the deadline fires first, the run ends immediately. Units still in flight are
///   abandoned: they count towards `requested_count` and
///   [`abandoned_count`](RunAccounting::abandoned_count) but never towards
///   `failure_count`.
///
/// A zero `timeout` or zero `n_requests` returns an empty accounting without calling
/// `make_unit`.
///
/// # Errors
///
/// Only fails if the limiter is unusable, which is a defect in the scheduling setup.
pub async fn gather_with_timeout<M, F, T, E>(
    mut make_unit: M,
    n_requests: usize,
    limiter: &ConcurrencyLimiter,
    timeout: Duration,
) -> Result<RunAccounting>
where
    M: FnMut() -> F,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let clock = RunClock::start();
    let deadline = clock
        .started_at()
        .checked_add(timeout)
        .unwrap_or_else(|| clock.started_at() + FAR_FUTURE);
    let mut tally = Tally::default();
    let mut rounds = 0_u64;

    while n_requests > 0 && Instant::now() < deadline {
        let round_start = Instant::now();
        let mut round = JoinSet::new();
        for _ in 0..n_requests {
            let unit = make_unit();
            let limiter = limiter.clone();
            round.spawn(async move { limiter.run(unit).await.map(Outcome::of) });
        }
        tally.requested += n_requests as u64;

        match tokio::time::timeout_at(deadline, drain(&mut round, &mut tally)).await {
            Ok(drained) => drained?,
            Err(_) => {
                let end = Instant::now();
                tally.abandoned = round.len() as u64;
                round.abort_all();

                let accounting = clock.finish_at(end, tally);
                tracing::info!(
                    rounds,
                    requested = accounting.requested_count(),
                    failures = accounting.failure_count(),
                    abandoned = accounting.abandoned_count(),
                    duration = ?accounting.duration(),
                    "deadline reached, abandoning in-flight units"
                );
                return Ok(accounting);
            }
        }

        rounds += 1;
        tracing::debug!(
            round = rounds,
            elapsed = ?round_start.elapsed(),
            remaining = ?deadline.saturating_duration_since(Instant::now()),
            "round finished"
        );
    }

    let accounting = clock.finish(tally);
    tracing::info!(
        rounds,
        requested = accounting.requested_count(),
        failures = accounting.failure_count(),
        duration = ?accounting.duration(),
        "budget exhausted between rounds"
    );

    Ok(accounting)
}

async fn drain(round: &mut JoinSet<Result<Outcome>>, tally: &mut Tally) -> Result<()> {
    while let Some(joined) = round.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome?,
            Err(error) => Outcome::panicked(&error),
        };
        tally.record(outcome);
    }
    Ok(())
}
