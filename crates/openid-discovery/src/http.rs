//! HTTP fetch collaborator.
//!
//! Every discovery component depends only on the narrow [`HttpFetch`] trait,
//! never on a concrete HTTP client. [`ReqwestFetcher`] is the production
//! implementation; tests substitute in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Request methods the discovery layer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// HTTP GET.
    Get,
    /// HTTP HEAD.
    Head,
    /// HTTP POST (no body; reserved for strategies that probe endpoints).
    Post,
}

/// Transport-level fetch errors.
///
/// There are no retries at this layer; a failed fetch is reported upward
/// immediately.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// HTTP client construction failed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),

    /// The request failed at the transport level.
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The response body exceeded the configured size limit.
    #[error("response from {0} exceeds the configured size limit")]
    ResponseTooLarge(String),

    /// Every configured fetch strategy failed.
    #[error("all host-meta fetch strategies failed: {0}")]
    AllStrategiesFailed(String),

    /// No fetch strategy completed before the deadline.
    #[error("host-meta fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// A fetched HTTP response: status, body bytes, and header lookup.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    status: u16,
    body: Bytes,
    headers: Vec<(String, String)>,
}

impl FetchResponse {
    /// Assemble a response (used by implementations and test fakes).
    pub fn new(status: u16, body: impl Into<Bytes>, headers: Vec<(String, String)>) -> Self {
        Self {
            status,
            body: body.into(),
            headers,
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Case-insensitive header lookup; returns the first matching value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Error unless the status is a success.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] for non-2xx responses.
    pub fn ensure_success(self, url: &Url) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                status: self.status,
                url: url.to_string(),
            })
        }
    }
}

/// The narrow fetch interface all discovery components depend on.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Perform one HTTP request.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure; non-success statuses are
    /// surfaced in the response, not as errors.
    async fn fetch(&self, method: Method, url: &Url) -> Result<FetchResponse, FetchError>;
}

/// Configuration for the production fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 64 KB).
    pub max_response_size: usize,

    /// User agent for HTTP requests.
    pub user_agent: String,

    /// Whether to follow HTTP redirects (default: false).
    ///
    /// Redirects are refused so a compromised host cannot bounce discovery
    /// to another origin; every hop in the chain must be fetched from the
    /// URL the previous hop named.
    pub follow_redirects: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_response_size: 64 * 1024,
            user_agent: format!("openid-discovery/{}", env!("CARGO_PKG_VERSION")),
            follow_redirects: false,
        }
    }
}

/// Production [`HttpFetch`] implementation backed by `reqwest`.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl ReqwestFetcher {
    /// Create a fetcher with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if client construction fails.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(FetchConfig::default())
    }

    /// Create a fetcher with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if client construction fails.
    pub fn with_config(config: FetchConfig) -> Result<Self, FetchError> {
        let redirect_policy = if config.follow_redirects {
            reqwest::redirect::Policy::limited(5)
        } else {
            reqwest::redirect::Policy::none()
        };
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(redirect_policy)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn fetch(&self, method: Method, url: &Url) -> Result<FetchResponse, FetchError> {
        debug!(%url, ?method, "fetching");

        let request = match method {
            Method::Get => self.client.get(url.clone()),
            Method::Head => self.client.head(url.clone()),
            Method::Post => self.client.post(url.clone()),
        };

        let response = request.send().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();

        if let Some(length) = response.content_length() {
            if length > self.config.max_response_size as u64 {
                return Err(FetchError::ResponseTooLarge(url.to_string()));
            }
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if body.len() > self.config.max_response_size {
            return Err(FetchError::ResponseTooLarge(url.to_string()));
        }

        Ok(FetchResponse::new(status, body, headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = FetchResponse::new(
            200,
            &b"ok"[..],
            vec![("Signature".to_string(), "abc".to_string())],
        );
        assert_eq!(response.header("signature"), Some("abc"));
        assert_eq!(response.header("SIGNATURE"), Some("abc"));
        assert_eq!(response.header("missing"), None);
    }

    #[test]
    fn ensure_success_rejects_error_statuses() {
        let url = Url::parse("https://example.com/").unwrap();
        let response = FetchResponse::new(404, &b""[..], Vec::new());
        assert!(matches!(
            response.ensure_success(&url),
            Err(FetchError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn fetcher_creation() {
        assert!(ReqwestFetcher::new().is_ok());
    }

    #[test]
    fn redirects_are_refused_by_default() {
        let config = FetchConfig::default();
        assert!(!config.follow_redirects);
        assert!(ReqwestFetcher::with_config(config).is_ok());
    }
}
