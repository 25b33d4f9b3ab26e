//! Log capture for tests.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Workspace crates whose logs are captured at full verbosity.
const WORKSPACE_TARGETS: [&str; 3] = ["fanout", "fanout_bench", "fanout_scheduling"];

fn workspace_filter() -> EnvFilter {
    WORKSPACE_TARGETS
        .iter()
        .filter_map(|target| format!("{target}=trace").parse::<Directive>().ok())
        .fold(EnvFilter::new("warn"), EnvFilter::add_directive)
}

/// Installs a subscriber writing to the test harness' captured output.
///
/// `RUST_LOG` takes precedence if set. Otherwise everything from the workspace crates is
/// logged, and only warnings from dependencies. Calling this more than once is harmless.
///
/// ```
/// fanout_test::tracing::init();
/// fanout_test::tracing::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| workspace_filter());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}
