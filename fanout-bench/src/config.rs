//! Configuration for benchmark runs.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `FANOUT__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `FANOUT__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `FANOUT__N_REQUESTS=5000` sets the number of requests per run or round
//! - `FANOUT__WORKLOAD__TYPE=fetch_range` selects the HTTP range workload
//! - `FANOUT__WORKLOAD__URL=http://localhost:8080/blob` sets its target
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! n_requests: 5000
//!
//! workload:
//!   type: fetch_range
//!   url: http://localhost:8080/blob
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use fanout_scheduling::{Strategy, timeout_from_secs};
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "FANOUT__";

/// Default size of the requested byte range, matching a typical COG header read.
const DEFAULT_REQUEST_SIZE: u64 = 16384;

/// Which scheduling strategy a run uses.
///
/// Used in: [`Config::strategy`]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Deadline-bounded if a positive [`Config::timeout`] is set, batch otherwise.
    #[default]
    Auto,
    /// Run all units to completion under the concurrency limit.
    Batch,
    /// Drain a queue with [`Config::workers`] long-lived workers.
    WorkerPool,
    /// Issue rounds until [`Config::timeout`] elapses. Requires a positive timeout.
    Deadline,
}

/// The unit of work fired by a run.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant
/// is used.
///
/// Used in: [`Config::workload`]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Workload {
    /// Synthetic unit that sleeps and optionally fails (type `"sleep"`).
    ///
    /// Useful to exercise the schedulers without any remote.
    ///
    /// # Example
    ///
    /// ```yaml
    /// workload:
    ///   type: sleep
    ///   latency: 20ms
    ///   jitter: 5ms
    ///   failure_rate: 0.1
    /// ```
    Sleep {
        /// Base duration of every unit.
        ///
        /// # Default
        ///
        /// `10ms`
        #[serde(with = "humantime_serde", default = "default_latency")]
        latency: Duration,

        /// Upper bound of a uniformly random delay added to `latency`.
        ///
        /// # Default
        ///
        /// `0s`
        #[serde(with = "humantime_serde", default)]
        jitter: Duration,

        /// Probability in `[0, 1]` that a unit fails.
        ///
        /// # Default
        ///
        /// `0.0`
        #[serde(default)]
        failure_rate: f64,

        /// Seed for jitter and failure injection. A random seed is used if unset.
        #[serde(default)]
        seed: Option<u64>,
    },

    /// HTTP `GET` of the first `request_size` bytes of `url` (type `"fetch_range"`).
    ///
    /// The unit sends `Range: bytes=0-{request_size}`, fails on any non-success status,
    /// and reads the full response body.
    ///
    /// # Example
    ///
    /// ```yaml
    /// workload:
    ///   type: fetch_range
    ///   url: https://sentinel-cogs.s3.amazonaws.com/some/file.tif
    ///   request_size: 16384
    /// ```
    FetchRange {
        /// URL of the object to read from.
        url: String,

        /// End offset of the requested byte range.
        ///
        /// # Default
        ///
        /// `16384`
        #[serde(default = "default_request_size")]
        request_size: u64,
    },
}

fn default_latency() -> Duration {
    Duration::from_millis(10)
}

fn default_request_size() -> u64 {
    DEFAULT_REQUEST_SIZE
}

impl Workload {
    /// Short identifier of the workload, as used in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sleep { .. } => "sleep",
            Self::FetchRange { .. } => "fetch_range",
        }
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self::Sleep {
            latency: default_latency(),
            jitter: Duration::ZERO,
            failure_rate: 0.0,
            seed: None,
        }
    }
}

/// HTTP client configuration.
///
/// Runs are assumed to send all requests to a single host, so the pool is sized per host.
///
/// Used in: [`Config::client`]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpClient {
    /// Maximum number of idle connections kept per host.
    ///
    /// # Default
    ///
    /// `50`
    ///
    /// # Environment Variable
    ///
    /// `FANOUT__CLIENT__POOL_SIZE_PER_HOST`
    pub pool_size_per_host: usize,

    /// Whether connections are reused between requests.
    ///
    /// # Default
    ///
    /// `true`
    pub keep_alive: bool,

    /// How long an idle connection is kept open.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub keep_alive_timeout: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            pool_size_per_host: 50,
            keep_alive: true,
            keep_alive_timeout: Duration::from_secs(30),
        }
    }
}

/// Log output format, parsed case-insensitively.
///
/// Used in: [`Logging::format`]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum LogFormat {
    /// [`LogFormat::Pretty`] when stderr is a terminal, [`LogFormat::Simplified`] otherwise.
    #[default]
    Auto,

    /// Single-line output with colors.
    ///
    /// ```text
    /// 2025-06-02T09:14:03.120Z  INFO fanout_scheduling::batch: batch finished requested=1000
    /// ```
    Pretty,

    /// Single-line plain text output.
    ///
    /// ```text
    /// 2025-06-02T09:14:03.120Z  INFO fanout_scheduling::batch: batch finished requested=1000
    /// ```
    Simplified,

    /// JSON lines.
    Json,
}

/// Error returned when parsing an unknown [`LogFormat`].
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"unknown log format "{}": expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Pretty => "pretty",
            Self::Simplified => "simplified",
            Self::Json => "json",
        })
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => Self::Auto,
            s if s.eq_ignore_ascii_case("auto") => Self::Auto,
            s if s.eq_ignore_ascii_case("pretty") => Self::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => Self::Simplified,
            s if s.eq_ignore_ascii_case("json") => Self::Json,
            s => return Err(FormatParseError(s.into())),
        })
    }
}

/// (De)serializes a value through its `Display` and `FromStr` impls.
mod display_fromstr {
    use std::borrow::Cow;
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
        T::Err: Display,
    {
        let s = Cow::<'de, str>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level, unless overridden by `RUST_LOG`.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `FANOUT__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `auto`
    ///
    /// # Environment Variable
    ///
    /// `FANOUT__LOGGING__FORMAT`
    #[serde(with = "display_fromstr")]
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Configuration of a single benchmark run.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of the run, reported in the summary.
    ///
    /// # Default
    ///
    /// A random UUID.
    pub run_id: String,

    /// Number of units per run, or per round for deadline-bounded runs.
    ///
    /// # Default
    ///
    /// `1000`
    pub n_requests: usize,

    /// Time budget in fractional seconds. Zero or negative values mean no budget.
    ///
    /// # Default
    ///
    /// `-1`
    pub timeout: f64,

    /// Scheduling strategy.
    ///
    /// # Default
    ///
    /// `auto`
    pub strategy: StrategyKind,

    /// Maximum number of units in flight for limiter-gated strategies.
    ///
    /// # Default
    ///
    /// `500`
    pub concurrency: usize,

    /// Number of workers for the `worker_pool` strategy.
    ///
    /// # Default
    ///
    /// `3`
    pub workers: usize,

    /// The unit of work to fire.
    pub workload: Workload,

    /// HTTP client settings for network workloads.
    pub client: HttpClient,

    /// Logging settings.
    pub logging: Logging,

    /// Path to write the run summary to as JSON.
    ///
    /// # Default
    ///
    /// `None` (summary is only printed)
    pub output: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            n_requests: 1000,
            timeout: -1.0,
            strategy: StrategyKind::Auto,
            concurrency: 500,
            workers: 3,
            workload: Workload::default(),
            client: HttpClient::default(),
            logging: Logging::default(),
            output: None,
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment, in
    /// increasing order of precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if any value has the
    /// wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Resolves the configured strategy and its parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the `deadline` strategy is requested without a positive timeout.
    pub fn scheduling(&self) -> Result<Strategy> {
        let strategy = match self.strategy {
            StrategyKind::Auto => Strategy::select(self.concurrency, Some(self.timeout)),
            StrategyKind::Batch => Strategy::Batch {
                concurrency: self.concurrency,
            },
            StrategyKind::WorkerPool => Strategy::WorkerPool {
                workers: self.workers,
            },
            StrategyKind::Deadline => match timeout_from_secs(self.timeout) {
                Some(timeout) => Strategy::DeadlineBounded {
                    concurrency: self.concurrency,
                    timeout,
                },
                None => bail!(
                    "the deadline strategy requires a positive timeout, got {}",
                    self.timeout
                ),
            },
        };

        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.n_requests, 1000);
            assert_eq!(config.concurrency, 500);
            assert_eq!(config.workers, 3);
            assert_eq!(config.workload, Workload::default());
            assert_eq!(config.client, HttpClient::default());
            assert_eq!(config.logging.level, LevelFilter::INFO);
            assert!(uuid::Uuid::parse_str(&config.run_id).is_ok());
            assert_eq!(
                config.scheduling().unwrap(),
                Strategy::Batch { concurrency: 500 }
            );

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("FANOUT__RUN_ID", "nightly");
            jail.set_env("FANOUT__TIMEOUT", "2.5");
            jail.set_env("FANOUT__WORKLOAD__TYPE", "fetch_range");
            jail.set_env("FANOUT__WORKLOAD__URL", "http://localhost:8080/blob");
            jail.set_env("FANOUT__CLIENT__KEEP_ALIVE_TIMEOUT", "5s");
            jail.set_env("FANOUT__LOGGING__LEVEL", "debug");
            jail.set_env("FANOUT__LOGGING__FORMAT", "JSON");

            let config = Config::load(None).unwrap();

            assert_eq!(config.run_id, "nightly");
            assert_eq!(
                config.workload,
                Workload::FetchRange {
                    url: "http://localhost:8080/blob".into(),
                    request_size: 16384,
                }
            );
            assert_eq!(config.client.keep_alive_timeout, Duration::from_secs(5));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(
                config.scheduling().unwrap(),
                Strategy::DeadlineBounded {
                    concurrency: 500,
                    timeout: Duration::from_millis(2500),
                }
            );

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            n_requests: 64
            strategy: worker_pool
            workers: 8
            workload:
                type: sleep
                latency: 25ms
                jitter: 5ms
                failure_rate: 0.25
                seed: 7
            output: /tmp/summary.json
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.n_requests, 64);
            assert_eq!(
                config.workload,
                Workload::Sleep {
                    latency: Duration::from_millis(25),
                    jitter: Duration::from_millis(5),
                    failure_rate: 0.25,
                    seed: Some(7),
                }
            );
            assert_eq!(config.output.as_deref(), Some(Path::new("/tmp/summary.json")));
            assert_eq!(
                config.scheduling().unwrap(),
                Strategy::WorkerPool { workers: 8 }
            );

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            concurrency: 10
            timeout: 3
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("FANOUT__CONCURRENCY", "20");

            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.concurrency, 20);
            assert_eq!(config.timeout, 3.0);

            Ok(())
        });
    }

    #[test]
    fn deadline_requires_timeout() {
        let config = Config {
            strategy: StrategyKind::Deadline,
            timeout: -1.0,
            ..Default::default()
        };
        assert!(config.scheduling().is_err());

        let config = Config {
            strategy: StrategyKind::Deadline,
            timeout: 0.5,
            concurrency: 4,
            ..Default::default()
        };
        assert_eq!(
            config.scheduling().unwrap(),
            Strategy::DeadlineBounded {
                concurrency: 4,
                timeout: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn invalid_log_format() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("FANOUT__LOGGING__FORMAT", "xml");
            assert!(Config::load(None).is_err());
            Ok(())
        });

        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Auto);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
