//! Instrumented units of work.
//!
//! [`InFlightProbe`] hands out units that sleep for a given duration while tracking how
//! many of them run at the same time. [`ExecutionLedger`] records how often each of a
//! fixed set of units has run.
//!
//! ```
//! use std::time::Duration;
//! use fanout_test::probe::InFlightProbe;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let probe = InFlightProbe::new();
//! probe.unit(Duration::from_millis(1), false).await.unwrap();
//! assert_eq!(probe.peak(), 1);
//! assert_eq!(probe.completed(), 1);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// The error returned by units that were asked to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitFailed;

impl fmt::Display for UnitFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unit of work failed on purpose")
    }
}

impl std::error::Error for UnitFailed {}

#[derive(Debug, Default)]
struct Counters {
    current: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

/// Tracks the number of concurrently executing units it created.
#[derive(Clone, Debug, Default)]
pub struct InFlightProbe {
    counters: Arc<Counters>,
}

impl InFlightProbe {
    /// Creates a probe with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a unit that sleeps for `duration` and then succeeds, or fails if `fail` is set.
    ///
    /// The unit counts as in flight from its first poll until it completes or is dropped.
    pub fn unit(
        &self,
        duration: Duration,
        fail: bool,
    ) -> impl Future<Output = Result<(), UnitFailed>> + Send + use<> {
        let counters = Arc::clone(&self.counters);
        async move {
            let _guard = InFlightGuard::enter(&counters);
            tokio::time::sleep(duration).await;
            counters.completed.fetch_add(1, Ordering::SeqCst);
            if fail { Err(UnitFailed) } else { Ok(()) }
        }
    }

    /// Number of units currently executing.
    pub fn current(&self) -> usize {
        self.counters.current.load(Ordering::SeqCst)
    }

    /// Highest number of units that were ever executing at the same time.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Number of units that ran to completion, successful or not.
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a> {
    counters: &'a Counters,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let current = counters.current.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(current, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counters.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counts executions per unit for a fixed number of units.
#[derive(Clone, Debug)]
pub struct ExecutionLedger {
    runs: Arc<Vec<AtomicU32>>,
}

impl ExecutionLedger {
    /// Creates a ledger for `len` units.
    pub fn new(len: usize) -> Self {
        Self {
            runs: Arc::new((0..len).map(|_| AtomicU32::new(0)).collect()),
        }
    }

    /// Creates the unit with index `index`, which records its execution and succeeds.
    pub fn unit(
        &self,
        index: usize,
    ) -> impl Future<Output = Result<(), UnitFailed>> + Send + use<> {
        let runs = Arc::clone(&self.runs);
        async move {
            tokio::task::yield_now().await;
            runs[index].fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Returns how often each unit has run.
    pub fn runs(&self) -> Vec<u32> {
        self.runs.iter().map(|r| r.load(Ordering::SeqCst)).collect()
    }

    /// Returns `true` if every unit ran exactly once.
    pub fn all_ran_once(&self) -> bool {
        self.runs.iter().all(|r| r.load(Ordering::SeqCst) == 1)
    }
}
