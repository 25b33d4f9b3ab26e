//! Timing and outcome accounting for a single scheduler invocation.

use std::fmt;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

/// The summary record returned by every scheduler invocation.
///
/// The record brackets the scheduling window with wall-clock timestamps and counts how
/// many units of work were dispatched and how many of them failed. It is immutable once
/// constructed.
///
/// `end_time` is derived from a monotonic clock reading taken at the start of the run,
/// so it can never precede `start_time`, even if the system clock is adjusted mid-run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunAccounting {
    start_time: SystemTime,
    end_time: SystemTime,
    requested_count: u64,
    failure_count: u64,
    abandoned_count: u64,
}

impl RunAccounting {
    /// Wall-clock time at which scheduling began.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Wall-clock time at which the scheduling window closed.
    pub fn end_time(&self) -> SystemTime {
        self.end_time
    }

    /// Number of units of work the scheduler dispatched.
    pub fn requested_count(&self) -> u64 {
        self.requested_count
    }

    /// Number of units of work that failed.
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Number of dispatched units that did not fail, `requested_count - failure_count`.
    ///
    /// Units abandoned at a deadline have no known failure and are included here.
    pub fn success_count(&self) -> u64 {
        self.requested_count - self.failure_count
    }

    /// Number of units still in flight when a deadline cut the run short.
    ///
    /// Always zero for schedulers that wait for every unit.
    pub fn abandoned_count(&self) -> u64 {
        self.abandoned_count
    }

    /// Length of the scheduling window.
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    /// Dispatched units per second over the scheduling window.
    ///
    /// Returns `0.0` for an empty window.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.requested_count as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested, {} failed in {:.3?}",
            self.requested_count,
            self.failure_count,
            self.duration()
        )
    }
}

/// Running totals of a scheduler invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Tally {
    pub requested: u64,
    pub failures: u64,
    pub abandoned: u64,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        if outcome == Outcome::Failure {
            self.failures += 1;
        }
    }
}

/// The classified result of one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Classifies the output of a unit of work, discarding its value.
    pub fn of<T, E>(result: Result<T, E>) -> Self
    where
        E: fmt::Display,
    {
        match result {
            Ok(_) => Self::Success,
            Err(error) => {
                tracing::debug!(%error, "unit of work failed");
                Self::Failure
            }
        }
    }

    /// Classifies a unit of work whose task did not return an output.
    ///
    /// A panicking unit counts as a failure, just like a unit that returned an error.
    pub fn panicked(error: &tokio::task::JoinError) -> Self {
        tracing::debug!(%error, "unit of work panicked");
        Self::Failure
    }
}

/// Marks the start of a scheduling window.
///
/// Creating a clock has no side effects beyond reading the system and monotonic clocks.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunClock {
    wall: SystemTime,
    monotonic: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            wall: SystemTime::now(),
            monotonic: Instant::now(),
        }
    }

    /// Returns the monotonic instant the window started at.
    pub fn started_at(&self) -> Instant {
        self.monotonic
    }

    /// Closes the window now and freezes the totals into a [`RunAccounting`].
    pub fn finish(self, tally: Tally) -> RunAccounting {
        self.finish_at(Instant::now(), tally)
    }

    /// Closes the window at `end` and freezes the totals into a [`RunAccounting`].
    pub fn finish_at(self, end: Instant, tally: Tally) -> RunAccounting {
        debug_assert!(tally.failures + tally.abandoned <= tally.requested);

        RunAccounting {
            start_time: self.wall,
            end_time: self.wall + end.saturating_duration_since(self.monotonic),
            requested_count: tally.requested,
            failure_count: tally.failures,
            abandoned_count: tally.abandoned,
        }
    }
}
