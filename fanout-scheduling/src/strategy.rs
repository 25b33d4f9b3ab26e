//! Selection between the available scheduling strategies.

use std::fmt;
use std::future::Future;
use std::iter;
use std::time::Duration;

use crate::accounting::RunAccounting;
use crate::batch::gather;
use crate::concurrency::ConcurrencyLimiter;
use crate::deadline::gather_with_timeout;
use crate::error::Result;
use crate::worker_pool::worker_pool;

/// Converts a timeout in fractional seconds into a deadline budget.
///
/// Zero, negative and non-finite values mean "no deadline" and yield `None`.
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// How a run of units of work is scheduled.
///
/// A strategy is plain data. Constructing or dropping one has no side effects; permits,
/// workers and timers only exist while [`run`](Self::run) is executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Run every unit to completion, gated by a concurrency limiter.
    ///
    /// See [`gather`].
    Batch {
        /// Maximum number of units running at once.
        concurrency: usize,
    },

    /// Push every unit onto a queue drained by a fixed number of workers.
    ///
    /// See [`worker_pool`].
    WorkerPool {
        /// Number of long-lived workers, which is also the concurrency bound.
        workers: usize,
    },

    /// Issue rounds of units until a time budget is exhausted.
    ///
    /// See [`gather_with_timeout`].
    DeadlineBounded {
        /// Maximum number of units running at once.
        concurrency: usize,
        /// Total time budget of the run.
        timeout: Duration,
    },
}

impl Strategy {
    /// Picks the deadline-bounded strategy if a positive timeout is given, and the batch
    /// strategy otherwise.
    pub fn select(concurrency: usize, timeout_secs: Option<f64>) -> Self {
        match timeout_secs.and_then(timeout_from_secs) {
            Some(timeout) => Self::DeadlineBounded {
                concurrency,
                timeout,
            },
            None => Self::Batch { concurrency },
        }
    }

    /// Short identifier of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Batch { .. } => "batch",
            Self::WorkerPool { .. } => "worker_pool",
            Self::DeadlineBounded { .. } => "deadline",
        }
    }

    /// Runs units of work built by `make_unit` according to this strategy.
    ///
    /// Batch and worker-pool runs build exactly `n_requests` units. Deadline-bounded runs
    /// build rounds of `n_requests` units until the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration, such as a zero concurrency limit or
    /// worker count. Failures of individual units are only reflected in the accounting.
    pub async fn run<M, F, T, E>(&self, n_requests: usize, make_unit: M) -> Result<RunAccounting>
    where
        M: FnMut() -> F,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.run_observed(n_requests, make_unit, |_| async {}).await
    }

    /// Like [`run`](Self::run), but periodically reports the number of in-flight units to
    /// `observe`.
    ///
    /// Reports are emitted every [`EMITTER_INTERVAL`](crate::EMITTER_INTERVAL) for
    /// limiter-gated strategies. Worker-pool runs have no limiter and are not observed.
    pub async fn run_observed<M, F, T, E, O, Fut>(
        &self,
        n_requests: usize,
        make_unit: M,
        observe: O,
    ) -> Result<RunAccounting>
    where
        M: FnMut() -> F,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        O: FnMut(usize) -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::debug!(strategy = %self, n_requests, "starting run");

        match *self {
            Self::Batch { concurrency } => {
                let limiter = ConcurrencyLimiter::new(concurrency)?;
                let units = iter::repeat_with(make_unit).take(n_requests);
                observed(&limiter, gather(units, &limiter), observe).await
            }
            Self::WorkerPool { workers } => {
                let units = iter::repeat_with(make_unit).take(n_requests);
                worker_pool(units, workers).await
            }
            Self::DeadlineBounded {
                concurrency,
                timeout,
            } => {
                let limiter = ConcurrencyLimiter::new(concurrency)?;
                let run = gather_with_timeout(make_unit, n_requests, &limiter, timeout);
                observed(&limiter, run, observe).await
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch { concurrency } => write!(f, "batch (concurrency: {concurrency})"),
            Self::WorkerPool { workers } => write!(f, "worker pool (workers: {workers})"),
            Self::DeadlineBounded {
                concurrency,
                timeout,
            } => write!(
                f,
                "deadline (concurrency: {concurrency}, timeout: {timeout:?})"
            ),
        }
    }
}

async fn observed<R, O, Fut>(limiter: &ConcurrencyLimiter, run: R, observe: O) -> R::Output
where
    R: Future,
    O: FnMut(usize) -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        biased;
        output = run => output,
        _ = limiter.run_emitter(observe) => unreachable!("emitter runs forever"),
    }
}
