//! Factories for the units of work fired during a run.
//!
//! A [`UnitFactory`] is built once per run from the [`Workload`] configuration and then
//! called by the scheduler to build every single unit. All state a unit needs, such as the
//! shared HTTP client or its injected latency, is captured when the unit is built.

use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::header::{HeaderValue, RANGE};
use thiserror::Error;

use crate::config::{HttpClient, Workload};

/// A unit of work resolving to the number of bytes it received.
pub type Unit = BoxFuture<'static, Result<u64, WorkloadError>>;

/// Failure of a single unit of work.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The request could not be sent, returned an error status, or its body failed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The synthetic workload decided to fail this unit.
    #[error("injected failure")]
    Injected,
}

/// Builds the shared HTTP client for network workloads.
pub fn build_client(config: &HttpClient) -> reqwest::Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .user_agent(concat!("fanout/", env!("CARGO_PKG_VERSION")));

    let builder = if config.keep_alive {
        builder
            .pool_max_idle_per_host(config.pool_size_per_host)
            .pool_idle_timeout(config.keep_alive_timeout)
    } else {
        builder.pool_max_idle_per_host(0)
    };

    builder.build()
}

/// Builds units of work for one of the configured workloads.
#[derive(Debug)]
pub enum UnitFactory {
    /// See [`Workload::Sleep`].
    Sleep {
        /// Base duration of every unit.
        latency: Duration,
        /// Upper bound of the random extra delay.
        jitter: Duration,
        /// Probability that a unit fails.
        failure_rate: f64,
        /// Source of jitter and failure decisions.
        rng: SmallRng,
    },

    /// See [`Workload::FetchRange`].
    FetchRange {
        /// Client shared by all units.
        client: reqwest::Client,
        /// Target of every request.
        url: reqwest::Url,
        /// Pre-rendered `Range` header value.
        range: HeaderValue,
    },
}

impl UnitFactory {
    /// Prepares the factory for `workload`, building an HTTP client if it needs one.
    ///
    /// # Errors
    ///
    /// Returns an error for an out-of-range failure rate, an invalid URL, or if the HTTP
    /// client cannot be built.
    pub fn new(workload: &Workload, client: &HttpClient) -> anyhow::Result<Self> {
        let factory = match *workload {
            Workload::Sleep {
                latency,
                jitter,
                failure_rate,
                seed,
            } => {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&failure_rate),
                    "failure_rate must be within [0, 1], got {failure_rate}"
                );
                let rng = match seed {
                    Some(seed) => SmallRng::seed_from_u64(seed),
                    None => SmallRng::from_os_rng(),
                };
                Self::Sleep {
                    latency,
                    jitter,
                    failure_rate,
                    rng,
                }
            }
            Workload::FetchRange {
                ref url,
                request_size,
            } => Self::FetchRange {
                client: build_client(client)?,
                url: url.parse()?,
                range: HeaderValue::from_str(&format!("bytes=0-{request_size}"))?,
            },
        };

        Ok(factory)
    }

    /// Builds the next unit of work. The unit does nothing until it is polled.
    pub fn make_unit(&mut self) -> Unit {
        match self {
            Self::Sleep {
                latency,
                jitter,
                failure_rate,
                rng,
            } => {
                let delay = *latency + jitter.mul_f64(rng.random::<f64>());
                let fail = rng.random_bool(*failure_rate);
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    if fail {
                        return Err(WorkloadError::Injected);
                    }
                    Ok(0)
                })
            }
            Self::FetchRange { client, url, range } => {
                let request = client.get(url.clone()).header(RANGE, range.clone());
                Box::pin(async move {
                    let response = request.send().await?.error_for_status()?;
                    let body = response.bytes().await?;
                    Ok(body.len() as u64)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleep_factory(failure_rate: f64, jitter: Duration) -> UnitFactory {
        let workload = Workload::Sleep {
            latency: Duration::from_millis(10),
            jitter,
            failure_rate,
            seed: Some(42),
        };
        UnitFactory::new(&workload, &HttpClient::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_failure_rate() {
        let workload = Workload::Sleep {
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            failure_rate: 1.5,
            seed: None,
        };
        assert!(UnitFactory::new(&workload, &HttpClient::default()).is_err());
    }

    #[test]
    fn rejects_invalid_url() {
        let workload = Workload::FetchRange {
            url: "not a url".into(),
            request_size: 16384,
        };
        assert!(UnitFactory::new(&workload, &HttpClient::default()).is_err());
    }

    #[test]
    fn renders_range_header() {
        let workload = Workload::FetchRange {
            url: "http://localhost:1/blob".into(),
            request_size: 1024,
        };
        let factory = UnitFactory::new(&workload, &HttpClient::default()).unwrap();
        let UnitFactory::FetchRange { range, .. } = factory else {
            panic!("expected fetch_range factory");
        };
        assert_eq!(range, "bytes=0-1024");
    }

    #[test]
    fn builds_client_with_and_without_keep_alive() {
        let pooled = HttpClient::default();
        assert!(build_client(&pooled).is_ok());

        let one_shot = HttpClient {
            keep_alive: false,
            ..HttpClient::default()
        };
        assert!(build_client(&one_shot).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_units_follow_failure_rate() {
        let mut always = sleep_factory(1.0, Duration::ZERO);
        let mut never = sleep_factory(0.0, Duration::ZERO);

        for _ in 0..10 {
            assert!(matches!(
                always.make_unit().await,
                Err(WorkloadError::Injected)
            ));
            assert_eq!(never.make_unit().await.unwrap(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_units_stay_within_jitter() {
        let mut factory = sleep_factory(0.0, Duration::from_millis(5));

        for _ in 0..20 {
            let start = tokio::time::Instant::now();
            factory.make_unit().await.unwrap();
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(10), "{elapsed:?}");
            assert!(elapsed <= Duration::from_millis(15), "{elapsed:?}");
        }
    }
}
