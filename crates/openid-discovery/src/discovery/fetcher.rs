//! Concurrent host-metadata fetching.
//!
//! Several independently configured strategies are raced; the first to come
//! back with a non-empty document wins and the rest are aborted. Which of
//! several near-simultaneous successes wins is intentionally unspecified.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use crate::hostmeta::HostMeta;
use crate::http::{FetchError, HttpFetch, Method};

/// Default overall deadline for a host-meta race.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One way of obtaining a host's metadata document.
#[async_trait]
pub trait HostMetaStrategy: Send + Sync {
    /// Fetch and parse host metadata for `host`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the document cannot be retrieved.
    async fn fetch(&self, host: &str) -> Result<HostMeta, FetchError>;
}

/// Fetches `{scheme}://{host}/.well-known/host-meta`.
pub struct WellKnownHostMetaFetcher {
    http: Arc<dyn HttpFetch>,
    scheme: &'static str,
}

impl WellKnownHostMetaFetcher {
    /// The standard strategy over `https`.
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self::with_scheme(http, "https")
    }

    /// The well-known location over an explicit scheme.
    pub fn with_scheme(http: Arc<dyn HttpFetch>, scheme: &'static str) -> Self {
        Self { http, scheme }
    }
}

#[async_trait]
impl HostMetaStrategy for WellKnownHostMetaFetcher {
    async fn fetch(&self, host: &str) -> Result<HostMeta, FetchError> {
        let location = format!("{}://{}/.well-known/host-meta", self.scheme, host);
        let url = Url::parse(&location).map_err(|e| FetchError::Transport {
            url: location.clone(),
            reason: e.to_string(),
        })?;
        let response = self
            .http
            .fetch(Method::Get, &url)
            .await?
            .ensure_success(&url)?;
        Ok(HostMeta::parse(response.body()))
    }
}

/// Races its strategies and returns the first non-empty document.
pub struct ParallelHostMetaFetcher {
    strategies: Vec<Arc<dyn HostMetaStrategy>>,
    timeout: Duration,
}

impl ParallelHostMetaFetcher {
    /// Build a fetcher over the given strategies with the default deadline.
    pub fn new(strategies: Vec<Arc<dyn HostMetaStrategy>>) -> Self {
        Self::with_timeout(strategies, DEFAULT_FETCH_TIMEOUT)
    }

    /// Build a fetcher with an explicit overall deadline.
    pub fn with_timeout(strategies: Vec<Arc<dyn HostMetaStrategy>>, timeout: Duration) -> Self {
        Self {
            strategies,
            timeout,
        }
    }

    /// Fetch host metadata for `host`.
    ///
    /// An empty document counts as a strategy failure. Losing strategies are
    /// aborted, not awaited.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::AllStrategiesFailed`] when every strategy came
    /// back without a usable document, or [`FetchError::Timeout`] when none
    /// completed before the deadline.
    pub async fn fetch(&self, host: &str) -> Result<HostMeta, FetchError> {
        if self.strategies.is_empty() {
            return Err(FetchError::AllStrategiesFailed(
                "no strategies configured".to_string(),
            ));
        }

        let mut tasks = JoinSet::new();
        for strategy in &self.strategies {
            let strategy = strategy.clone();
            let host = host.to_string();
            tasks.spawn(async move { strategy.fetch(&host).await });
        }

        let mut failures = Vec::new();
        let winner = tokio::time::timeout(self.timeout, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(doc)) if !doc.is_empty() => return Some(doc),
                    Ok(Ok(_)) => failures.push("empty host-meta document".to_string()),
                    Ok(Err(error)) => {
                        debug!(%error, "host-meta strategy failed");
                        failures.push(error.to_string());
                    }
                    Err(join_error) => failures.push(join_error.to_string()),
                }
            }
            None
        })
        .await;
        tasks.abort_all();

        match winner {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) => {
                warn!(host, "all host-meta strategies failed");
                Err(FetchError::AllStrategiesFailed(failures.join("; ")))
            }
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStrategy {
        delay: Duration,
        outcome: Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl HostMetaStrategy for FixedStrategy {
        async fn fetch(&self, _host: &str) -> Result<HostMeta, FetchError> {
            tokio::time::sleep(self.delay).await;
            match self.outcome {
                Ok(body) => Ok(HostMeta::parse(body.as_bytes())),
                Err(reason) => Err(FetchError::Transport {
                    url: "test".to_string(),
                    reason: reason.to_string(),
                }),
            }
        }
    }

    const DOC: &str = "Link: <https://example.com/xrd>; rel=describedby\n";

    fn strategy(
        delay_ms: u64,
        outcome: Result<&'static str, &'static str>,
    ) -> Arc<dyn HostMetaStrategy> {
        Arc::new(FixedStrategy {
            delay: Duration::from_millis(delay_ms),
            outcome,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_successful_strategy_wins() {
        let fetcher = ParallelHostMetaFetcher::new(vec![
            strategy(5, Err("connection refused")),
            strategy(10, Ok(DOC)),
            strategy(500, Ok(DOC)),
        ]);
        let doc = fetcher.fetch("example.com").await.unwrap();
        assert_eq!(doc.links().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_mask_a_later_success() {
        let fetcher = ParallelHostMetaFetcher::new(vec![
            strategy(1, Err("refused")),
            strategy(2, Ok("")),
            strategy(50, Ok(DOC)),
        ]);
        assert!(fetcher.fetch("example.com").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_surface_a_decision_error() {
        let fetcher = ParallelHostMetaFetcher::new(vec![
            strategy(1, Err("refused")),
            strategy(2, Err("reset")),
        ]);
        let result = fetcher.fetch("example.com").await;
        assert!(matches!(result, Err(FetchError::AllStrategiesFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_documents_count_as_failures() {
        let fetcher = ParallelHostMetaFetcher::new(vec![strategy(1, Ok(""))]);
        let result = fetcher.fetch("example.com").await;
        assert!(matches!(result, Err(FetchError::AllStrategiesFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_is_a_timeout() {
        let fetcher = ParallelHostMetaFetcher::with_timeout(
            vec![strategy(60_000, Ok(DOC))],
            Duration::from_millis(100),
        );
        let result = fetcher.fetch("example.com").await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn no_strategies_is_a_decision_error() {
        let fetcher = ParallelHostMetaFetcher::new(Vec::new());
        let result = fetcher.fetch("example.com").await;
        assert!(matches!(result, Err(FetchError::AllStrategiesFailed(_))));
    }
}
