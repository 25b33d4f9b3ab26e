//! A fixed-size pool of long-lived workers draining a shared work queue.
//!
//! The pool moves through three phases:
//!
//! 1. **Accepting**: [`WorkerPool::start`] spawns the workers, which block on the queue. The
//!    producer [pushes](WorkerPool::push) units without ever waiting for a permit.
//! 2. **Draining**: [`WorkerPool::finish`] waits on the drain barrier, which resolves once
//!    every pushed unit has been popped *and* has finished running.
//! 3. **Stopped**: the workers are cancelled and awaited, so none outlives the call.
//!
//! The worker count is the only concurrency bound; units are not gated by a limiter.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures_util::FutureExt;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::accounting::{Outcome, RunAccounting, RunClock, Tally};
use crate::error::{Error, Result};

/// Runs every unit of work in `units` on a pool of `workers` long-lived workers.
///
/// All units are pushed up front; the call returns once the queue has been fully drained
/// and every worker has shut down.
///
/// # Errors
///
/// Returns [`Error::ZeroWorkers`] if `workers` is zero, and [`Error::Worker`] if a worker
/// loop died instead of shutting down cooperatively.
pub async fn worker_pool<I, F, T, E>(units: I, workers: usize) -> Result<RunAccounting>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let mut pool = WorkerPool::start(workers)?;
    for unit in units {
        pool.push(unit)?;
    }
    pool.finish().await
}

/// Unbounded FIFO of pending units with a drain barrier.
struct WorkQueue<F> {
    sender: mpsc::UnboundedSender<F>,
    receiver: Mutex<mpsc::UnboundedReceiver<F>>,
    unfinished: AtomicUsize,
    drained: Notify,
}

impl<F> WorkQueue<F> {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            unfinished: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    fn push(&self, unit: F) -> Result<()> {
        self.unfinished.fetch_add(1, Ordering::AcqRel);
        self.sender.send(unit).map_err(|_| {
            self.unfinished.fetch_sub(1, Ordering::AcqRel);
            Error::QueueClosed
        })
    }

    /// Waits for the next unit. Only one worker waits on the channel at a time.
    async fn pop(&self) -> Option<F> {
        self.receiver.lock().await.recv().await
    }

    /// Marks one popped unit as finished.
    fn task_done(&self) {
        if self.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Waits until every pushed unit has been popped and finished.
    async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            if self.unfinished.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A running pool of workers that execute pushed units of work one at a time each.
///
/// Dropping a pool without calling [`finish`](Self::finish) cancels its workers and
/// abandons queued units.
pub struct WorkerPool<F> {
    queue: Arc<WorkQueue<F>>,
    failures: Arc<AtomicU64>,
    workers: JoinSet<()>,
    shutdown: CancellationToken,
    clock: RunClock,
    pushed: u64,
}

impl<F, T, E> WorkerPool<F>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Spawns `workers` worker loops and opens the scheduling window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::ZeroWorkers);
        }

        let queue = Arc::new(WorkQueue::new());
        let failures = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            set.spawn(run_worker(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&failures),
                shutdown.clone(),
            ));
        }
        tracing::debug!(workers, "worker pool started");

        Ok(Self {
            queue,
            failures,
            workers: set,
            shutdown,
            clock: RunClock::start(),
            pushed: 0,
        })
    }

    /// Enqueues a unit of work. Never waits.
    pub fn push(&mut self, unit: F) -> Result<()> {
        self.queue.push(unit)?;
        self.pushed += 1;
        Ok(())
    }

    /// Returns the number of units pushed so far.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Waits for the queue to drain, then stops all workers.
    ///
    /// The scheduling window closes at the drain barrier; worker shutdown is not part of
    /// the measured workload.
    pub async fn finish(mut self) -> Result<RunAccounting> {
        self.queue.join().await;
        let drained_at = Instant::now();

        self.shutdown.cancel();
        while let Some(joined) = self.workers.join_next().await {
            joined?;
        }

        let tally = Tally {
            requested: self.pushed,
            failures: self.failures.load(Ordering::Acquire),
            abandoned: 0,
        };
        let accounting = self.clock.finish_at(drained_at, tally);
        tracing::info!(
            requested = accounting.requested_count(),
            failures = accounting.failure_count(),
            duration = ?accounting.duration(),
            "worker pool drained"
        );

        Ok(accounting)
    }
}

impl<F> Drop for WorkerPool<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<F> fmt::Debug for WorkerPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("pushed", &self.pushed)
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

async fn run_worker<F, T, E>(
    worker_id: usize,
    queue: Arc<WorkQueue<F>>,
    failures: Arc<AtomicU64>,
    shutdown: CancellationToken,
) where
    F: Future<Output = Result<T, E>> + Send + 'static,
    E: fmt::Display,
{
    loop {
        let unit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            unit = queue.pop() => match unit {
                Some(unit) => unit,
                None => break,
            },
        };

        let outcome = match AssertUnwindSafe(unit).catch_unwind().await {
            Ok(result) => Outcome::of(result),
            Err(_) => {
                tracing::debug!(worker_id, "unit of work panicked");
                Outcome::Failure
            }
        };
        if outcome == Outcome::Failure {
            failures.fetch_add(1, Ordering::AcqRel);
        }

        queue.task_done();
    }

    tracing::trace!(worker_id, "worker stopped");
}
