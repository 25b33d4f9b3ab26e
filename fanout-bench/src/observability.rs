//! Tracing setup for the `fanout` binary.

use std::env;
use std::io::{self, IsTerminal};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{LogFormat, Logging};

/// Installs the global subscriber writing to stderr in the configured format.
pub fn init_tracing(config: &Logging) {
    let (level, env_filter) = parse_rust_log(config.level);

    let format = format_layer(resolve_format(config.format), io::stderr);

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

/// Builds the fmt layer for a resolved `format`, writing to `writer`.
fn format_layer<W>(format: LogFormat, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed(),
        LogFormat::Simplified => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty | LogFormat::Auto => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(true)
            .with_target(true)
            .compact()
            .boxed(),
    }
}

fn resolve_format(format: LogFormat) -> LogFormat {
    match format {
        LogFormat::Auto if io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        other => other,
    }
}

/// Derives the effective level and directives from `RUST_LOG`.
///
/// A plain level in `RUST_LOG` overrides `default_level`. Anything else is used literally as
/// filter directives, in which case all levels pass the level filter.
pub fn parse_rust_log(default_level: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => default_level,
    };

    // Maximum verbosity per crate, narrowed down to `level` by the format layer.
    let env_filter = EnvFilter::new(
        "INFO,\
        hyper=WARN,\
        reqwest=INFO,\
        fanout=TRACE,\
        fanout_bench=TRACE,\
        fanout_scheduling=TRACE,\
        ",
    );

    (level, env_filter)
}
