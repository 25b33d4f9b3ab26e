use thiserror::Error;

/// Errors raised by the scheduling machinery itself.
///
/// Failures of individual units of work never show up here. They are counted in the
/// [`RunAccounting`](crate::RunAccounting) of the run instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A concurrency limiter was configured without any permits.
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,

    /// A worker pool was configured without any workers.
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// All permits of the limiter are currently held.
    #[error("concurrency limit reached")]
    AtCapacity,

    /// The limiter's semaphore was closed while a permit was requested.
    #[error("concurrency limiter closed")]
    LimiterClosed,

    /// The work queue stopped accepting units while the pool was still running.
    #[error("work queue closed")]
    QueueClosed,

    /// A worker loop terminated abnormally instead of shutting down cooperatively.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Result type for scheduler operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
