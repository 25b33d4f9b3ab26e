//! Benchmark driver for the `fanout-scheduling` strategies.
//!
//! The `fanout` binary loads a [`Config`](config::Config), builds the configured workload,
//! fires it under the selected scheduling strategy and prints a [`Report`](report::Report)
//! of the run. Two workloads are available: a synthetic sleep unit with optional failure
//! injection, and an HTTP range read that mimics fetching a COG header.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod bench;
pub mod cli;
pub mod config;
pub mod observability;
pub mod report;
pub mod workload;
