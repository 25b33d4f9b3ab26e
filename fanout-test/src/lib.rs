//! Shared helpers for the tests of the fanout crates.
//!
//! - [`tracing`] captures logs in the test harness.
//! - [`probe`] provides instrumented units of work that record how they were scheduled.

pub mod probe;
pub mod tracing;
