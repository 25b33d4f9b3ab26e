//! Scheduling strategies for firing many small units of work concurrently.
//!
//! A *unit of work* is any `Future<Output = Result<T, E>>`. Its value is discarded; the
//! scheduler only classifies it as a success or a failure. A panicking unit counts as a
//! failure. Every scheduler invocation returns a [`RunAccounting`] that brackets the
//! scheduling window and counts dispatched and failed units.
//!
//! Three strategies are available, selectable through [`Strategy`]:
//!
//! - [`gather`] runs a whole batch to completion under a [`ConcurrencyLimiter`].
//! - [`worker_pool`] drains a queue with a fixed number of long-lived workers.
//! - [`gather_with_timeout`] issues rounds of fresh units until a time budget runs out and
//!   returns partial results at the deadline.
//!
//! Failures of individual units never surface as errors. [`Error`] is reserved for
//! defects in the scheduling setup, such as a zero concurrency limit.
//!
//! ```
//! use fanout_scheduling::Strategy;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> fanout_scheduling::Result<()> {
//! let strategy = Strategy::select(16, Some(-1.0));
//! let accounting = strategy
//!     .run(100, || async { Ok::<_, std::io::Error>(()) })
//!     .await?;
//!
//! assert_eq!(accounting.requested_count(), 100);
//! assert_eq!(accounting.failure_count(), 0);
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod accounting;
mod batch;
mod concurrency;
mod deadline;
mod error;
mod strategy;
mod worker_pool;

pub use crate::accounting::RunAccounting;
pub use crate::batch::gather;
pub use crate::concurrency::{ConcurrencyLimiter, ConcurrencyPermit, EMITTER_INTERVAL};
pub use crate::deadline::gather_with_timeout;
pub use crate::error::{Error, Result};
pub use crate::strategy::{Strategy, timeout_from_secs};
pub use crate::worker_pool::{WorkerPool, worker_pool};
