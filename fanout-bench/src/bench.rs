//! Executes one configured benchmark run.

use anyhow::Result;
use futures_util::future;

use crate::config::Config;
use crate::report::Report;
use crate::workload::UnitFactory;

/// Runs the workload of `config` under its scheduling strategy and reports the outcome.
///
/// The summary is printed to stdout and, if [`Config::output`] is set, written there as
/// JSON. While the run is in progress, the number of units in flight is logged once per
/// [`EMITTER_INTERVAL`](fanout_scheduling::EMITTER_INTERVAL).
pub async fn run(config: &Config) -> Result<Report> {
    let strategy = config.scheduling()?;
    let mut factory = UnitFactory::new(&config.workload, &config.client)?;
    let workload = config.workload.name();

    tracing::info!(
        run_id = %config.run_id,
        workload,
        %strategy,
        n_requests = config.n_requests,
        "starting run"
    );

    let accounting = strategy
        .run_observed(
            config.n_requests,
            || factory.make_unit(),
            |in_flight| {
                tracing::debug!(in_flight, "units in flight");
                future::ready(())
            },
        )
        .await?;
    tracing::info!(run_id = %config.run_id, %accounting, "run finished");

    let report = Report::new(&config.run_id, workload, &strategy, &accounting);
    report.print();
    if let Some(path) = &config.output {
        report.write_json(path)?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{StrategyKind, Workload};

    fn sleep_config(strategy: StrategyKind, timeout: f64) -> Config {
        Config {
            run_id: "test".into(),
            n_requests: 20,
            timeout,
            strategy,
            concurrency: 5,
            workers: 2,
            workload: Workload::Sleep {
                latency: Duration::from_millis(10),
                jitter: Duration::ZERO,
                failure_rate: 0.0,
                seed: Some(1),
            },
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_run() {
        fanout_test::tracing::init();

        let report = run(&sleep_config(StrategyKind::Auto, -1.0)).await.unwrap();

        assert_eq!(report.requested, 20);
        assert_eq!(report.failures, 0);
        assert_eq!(report.duration_secs, 0.04);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_run() {
        fanout_test::tracing::init();

        let report = run(&sleep_config(StrategyKind::WorkerPool, -1.0))
            .await
            .unwrap();

        assert_eq!(report.requested, 20);
        assert_eq!(report.duration_secs, 0.1);
        assert_eq!(report.strategy, "worker pool (workers: 2)");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_run_writes_output() {
        fanout_test::tracing::init();

        let dir = tempfile::tempdir().unwrap();
        let mut config = sleep_config(StrategyKind::Auto, 0.125);
        config.output = Some(dir.path().join("summary.json"));

        let report = run(&config).await.unwrap();

        // Rounds of 20 units at concurrency 5 take 40ms, so the fourth round is cut off.
        assert_eq!(report.requested, 80);
        assert_eq!(report.abandoned, 20);
        assert_eq!(report.duration_secs, 0.125);
        assert!(dir.path().join("summary.json").exists());
    }

    #[tokio::test]
    async fn invalid_strategy_is_reported() {
        let config = sleep_config(StrategyKind::Deadline, 0.0);
        assert!(run(&config).await.is_err());
    }
}
