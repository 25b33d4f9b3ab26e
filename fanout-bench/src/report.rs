//! Summary of a finished run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use fanout_scheduling::{RunAccounting, Strategy};
use serde::Serialize;
use yansi::Paint;

/// The record describing one run, printed to stdout and optionally stored as JSON.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    /// Identifier of the run.
    pub run_id: String,
    /// Workload type.
    pub workload: String,
    /// Scheduling strategy, including its parameters.
    pub strategy: String,
    /// Opening of the scheduling window, RFC 3339.
    pub start_time: String,
    /// Closing of the scheduling window, RFC 3339.
    pub end_time: String,
    /// Length of the scheduling window in seconds.
    pub duration_secs: f64,
    /// Units dispatched.
    pub requested: u64,
    /// Units that failed.
    pub failures: u64,
    /// Units not counted as failed.
    pub successes: u64,
    /// Units still in flight when the deadline fired.
    pub abandoned: u64,
    /// Dispatched units per second of the scheduling window.
    pub requests_per_sec: f64,
}

impl Report {
    /// Builds the report for a run with the given accounting.
    pub fn new(
        run_id: &str,
        workload: &str,
        strategy: &Strategy,
        accounting: &RunAccounting,
    ) -> Self {
        Self {
            run_id: run_id.to_owned(),
            workload: workload.to_owned(),
            strategy: strategy.to_string(),
            start_time: rfc3339(accounting.start_time()),
            end_time: rfc3339(accounting.end_time()),
            duration_secs: accounting.duration().as_secs_f64(),
            requested: accounting.requested_count(),
            failures: accounting.failure_count(),
            successes: accounting.success_count(),
            abandoned: accounting.abandoned_count(),
            requests_per_sec: accounting.throughput(),
        }
    }

    /// Prints a colored summary to stdout.
    pub fn print(&self) {
        println!();
        println!(
            "{} {} ({}, {})",
            "## Run".bold(),
            self.run_id.bold().blue(),
            self.workload,
            self.strategy
        );
        println!("  {} -> {}", self.start_time, self.end_time);

        print!(
            "{} ({} requested",
            "REQUESTS:".bold().green(),
            self.requested.bold()
        );
        if self.failures > 0 {
            print!(", {}", format!("{} FAILURES", self.failures).bold().red());
        }
        if self.abandoned > 0 {
            print!(", {}", format!("{} abandoned", self.abandoned).yellow());
        }
        println!(")");

        println!(
            "  {} succeeded in {:.3}s; {:.2} requests/s",
            self.successes.bold(),
            self.duration_secs,
            self.requests_per_sec.bold()
        );
    }

    /// Writes the report as pretty JSON to `path`, replacing any existing file.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).context("failed to write report")?;
        writer.flush().context("failed to write report")?;
        Ok(())
    }
}

fn rfc3339(time: SystemTime) -> String {
    humantime::format_rfc3339_millis(time).to_string()
}
