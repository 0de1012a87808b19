//! Discovery orchestration: from an identifier to authentication endpoints.
//!
//! Per call this is a plain state machine: fetch host metadata, pick the
//! right pointer, then terminate or recurse into XRD resolution. There is
//! no shared mutable state besides the trust-validation cache. A legacy discovery
//! collaborator, when configured, catches everything the new-style chain
//! cannot resolve; its results are always marked insecure.

pub mod fetcher;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::hostmeta::Link;
use crate::http::{FetchError, HttpFetch};
use crate::selector;
use crate::template::{self, TemplateError};
use crate::trust::TrustResolver;
use crate::types::{DiscoveryRecord, Identifier, ProtocolVersion};
use crate::xrds::{XrdError, XrdResolver};

use fetcher::{HostMetaStrategy, ParallelHostMetaFetcher, WellKnownHostMetaFetcher};

/// Discovery failures.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A network fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A resource descriptor failed to parse.
    #[error(transparent)]
    Xrd(#[from] XrdError),

    /// URI template expansion failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The identifier has no host to look metadata up for.
    #[error("identifier {0:?} has no host")]
    NoHost(String),

    /// Host metadata carries no usable descriptor pointer.
    #[error("host metadata for {host} carries no descriptor pointer")]
    NoMetadataPointer { host: String },

    /// An XRD lacks a required service entry.
    #[error("descriptor at {url} has no service of type {service_type}")]
    MissingService { service_type: String, url: String },

    /// A `describedby` entry lacks the URI template needed to go on.
    #[error("descriptor at {url} has no URI template for user resolution")]
    MissingTemplate { url: String },

    /// The strategy exists in the ladder but has no implementation.
    #[error("discovery strategy not implemented: {0}")]
    UnsupportedStrategy(&'static str),

    /// The legacy collaborator failed.
    #[error("legacy discovery failed: {0}")]
    Legacy(String),
}

/// An endpoint produced by the legacy discovery collaborator.
#[derive(Debug, Clone)]
pub struct LegacyEndpoint {
    /// The authentication endpoint.
    pub endpoint: Url,

    /// Claimed identifier, when the legacy engine resolved one.
    pub claimed_id: Option<Url>,

    /// Provider-local identifier, when present.
    pub local_id: Option<String>,

    /// Endpoint protocol version.
    pub version: ProtocolVersion,
}

impl LegacyEndpoint {
    /// Legacy results never carry a verifiable signature chain.
    fn into_record(self) -> DiscoveryRecord {
        DiscoveryRecord {
            endpoint: self.endpoint,
            claimed_id: self.claimed_id,
            local_id: self.local_id,
            version: self.version,
            secure: false,
        }
    }
}

/// The external legacy discovery engine.
#[async_trait]
pub trait LegacyDiscovery: Send + Sync {
    /// Discover endpoints for a legacy-compatible identifier string.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Legacy`] (or any other variant) when the
    /// legacy engine cannot resolve the identifier.
    async fn discover(&self, identifier: &str) -> Result<Vec<LegacyEndpoint>, DiscoveryError>;
}

/// The top-level discovery engine.
pub struct Discoverer {
    host_meta: ParallelHostMetaFetcher,
    resolver: XrdResolver,
    legacy: Option<Arc<dyn LegacyDiscovery>>,
}

impl Discoverer {
    /// Build a discoverer with the standard well-known host-meta strategies
    /// (`https` first, `http` as a concurrent alternative).
    pub fn new(http: Arc<dyn HttpFetch>, trust: Arc<TrustResolver>) -> Self {
        let strategies: Vec<Arc<dyn HostMetaStrategy>> = vec![
            Arc::new(WellKnownHostMetaFetcher::new(http.clone())),
            Arc::new(WellKnownHostMetaFetcher::with_scheme(http.clone(), "http")),
        ];
        Self {
            host_meta: ParallelHostMetaFetcher::new(strategies),
            resolver: XrdResolver::new(http, trust),
            legacy: None,
        }
    }

    /// Replace the host-meta fetcher.
    pub fn with_host_meta(mut self, host_meta: ParallelHostMetaFetcher) -> Self {
        self.host_meta = host_meta;
        self
    }

    /// Configure the legacy fallback collaborator.
    pub fn with_legacy(mut self, legacy: Arc<dyn LegacyDiscovery>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// Discover authentication endpoints for an identifier.
    ///
    /// Site identifiers resolve to provider endpoints; claimed identifiers
    /// walk the user-level strategy ladder. When a legacy collaborator is
    /// configured, it catches failures and empty results of the new-style
    /// chain.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when no path (including the legacy
    /// fallback, if any) produced a result.
    pub async fn discover(
        &self,
        identifier: &Identifier,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        debug!(%identifier, "starting discovery");
        match identifier {
            Identifier::Site(host) => {
                self.with_legacy_fallback(identifier, self.site_via_host_meta(host))
                    .await
            }
            Identifier::Claimed(claimed) => {
                self.with_legacy_fallback(identifier, self.discover_user(claimed))
                    .await
            }
        }
    }

    /// Run the new-style attempt; on failure or an empty result, hand the
    /// legacy-compatible identifier to the legacy engine.
    async fn with_legacy_fallback<F>(
        &self,
        identifier: &Identifier,
        attempt: F,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError>
    where
        F: std::future::Future<Output = Result<Vec<DiscoveryRecord>, DiscoveryError>> + Send,
    {
        let outcome = attempt.await;
        let Some(legacy) = self.legacy.as_ref() else {
            return outcome;
        };
        match outcome {
            Ok(records) if !records.is_empty() => return Ok(records),
            Ok(_) => debug!(%identifier, "new-style discovery found nothing; trying legacy"),
            Err(error) => {
                warn!(%identifier, %error, "new-style discovery failed; trying legacy");
            }
        }

        let endpoints = legacy.discover(&identifier.legacy_identifier()).await?;
        Ok(endpoints
            .into_iter()
            .map(LegacyEndpoint::into_record)
            .collect())
    }

    /// Site path: host metadata → provider-descriptor pointer → site XRD.
    /// No pointer means the host opted out; that is an empty result, not an
    /// error.
    async fn site_via_host_meta(
        &self,
        host: &str,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        let meta = self.host_meta.fetch(host).await?;
        let Some(xrd_url) = selected_target(meta.links(), &selector::site_tiers()) else {
            debug!(host, "host metadata has no provider descriptor pointer");
            return Ok(Vec::new());
        };
        self.resolver.discover_site(&xrd_url, host).await
    }

    /// User ladder: host-meta based resolution, then the reserved
    /// link-header and link-element strategies.
    async fn discover_user(
        &self,
        claimed: &Url,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        let host_meta_failure = match self.user_via_host_meta(claimed).await {
            Ok(records) if !records.is_empty() => return Ok(records),
            Ok(_) => None,
            Err(error) => {
                debug!(%error, "host-meta user strategy failed");
                Some(error)
            }
        };

        // The remaining strategies need collaborators (raw response headers,
        // HTML parsing) this crate does not ship; they fail uniformly
        // instead of pretending to have looked.
        for reserved in ["link-header", "link-element"] {
            debug!(strategy = reserved, "strategy not implemented");
        }
        Err(host_meta_failure.unwrap_or(DiscoveryError::UnsupportedStrategy("link-header")))
    }

    /// Host-meta user strategy: a matching `Link-Pattern` goes straight to
    /// the user XRD; otherwise a matching `Link` goes through the site XRD.
    async fn user_via_host_meta(
        &self,
        claimed: &Url,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        let host = claimed
            .host_str()
            .ok_or_else(|| DiscoveryError::NoHost(claimed.to_string()))?;
        let meta = self.host_meta.fetch(host).await?;

        if let Some(pattern) =
            selector::select(meta.link_patterns(), selector::XRDS_MIME, &selector::user_tiers())
        {
            if let Some(template) = pattern.template() {
                let user_url = template::expand(template, claimed.as_str())?;
                debug!(%user_url, "resolving user descriptor from link pattern");
                return self
                    .resolver
                    .discover_user_direct(&user_url, claimed, None)
                    .await;
            }
        }

        let Some(site_url) = selected_target(meta.links(), &selector::site_tiers()) else {
            return Err(DiscoveryError::NoMetadataPointer {
                host: host.to_string(),
            });
        };
        self.resolver
            .discover_user_via_site(&site_url, host, claimed)
            .await
    }
}

/// The resolved URL of the best-matching link, if any.
fn selected_target(
    links: &[Link],
    tiers: &[crate::hostmeta::RelationTypeSet],
) -> Option<Url> {
    selector::select(links, selector::XRDS_MIME, tiers)
        .and_then(Link::target_url)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{FetchResponse, Method};
    use crate::trust::{PkixChainValidator, TrustStore};
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeHttp {
        routes: HashMap<String, FetchResponse>,
    }

    impl FakeHttp {
        fn new(routes: Vec<(&str, &str)>) -> Arc<Self> {
            Arc::new(Self {
                routes: routes
                    .into_iter()
                    .map(|(url, body)| {
                        (
                            url.to_string(),
                            FetchResponse::new(200, body.as_bytes().to_vec(), Vec::new()),
                        )
                    })
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl HttpFetch for FakeHttp {
        async fn fetch(&self, _: Method, url: &Url) -> Result<FetchResponse, FetchError> {
            self.routes
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    status: 404,
                    url: url.to_string(),
                })
        }
    }

    fn discoverer(routes: Vec<(&str, &str)>) -> Discoverer {
        let http = FakeHttp::new(routes);
        let trust = Arc::new(TrustResolver::new(PkixChainValidator::new(
            TrustStore::default(),
        )));
        let strategies: Vec<Arc<dyn HostMetaStrategy>> =
            vec![Arc::new(WellKnownHostMetaFetcher::new(http.clone()))];
        Discoverer::new(http, trust).with_host_meta(ParallelHostMetaFetcher::with_timeout(
            strategies,
            Duration::from_secs(1),
        ))
    }

    const HOST_META_SITE: &str = "Link: <https://example.com/site-xrd>; \
        type=application/xrds+xml; \
        rel=\"describedby http://specs.openid.net/auth/2.5/xrd-op\"\n";

    const SITE_XRD: &str = r#"<XRD xmlns="xri://$xrd*($v*2.0)">
  <Service>
    <Type>http://specs.openid.net/auth/2.0/server</Type>
    <URI>https://op.example.com/endpoint</URI>
  </Service>
</XRD>"#;

    const HOST_META_USER_PATTERN: &str = "Link-Pattern: <https://example.com/user?uri={%uri}>; \
        type=application/xrds+xml; \
        rel=\"describedby http://specs.openid.net/auth/2.5/xrd-signon\"\n";

    const USER_XRD: &str = r#"<XRD xmlns="xri://$xrd*($v*2.0)">
  <Service>
    <Type>http://specs.openid.net/auth/2.0/signon</Type>
    <URI>https://op.example.com/endpoint</URI>
  </Service>
</XRD>"#;

    #[tokio::test]
    async fn site_discovery_walks_host_meta_into_the_descriptor() {
        let engine = discoverer(vec![
            ("https://example.com/.well-known/host-meta", HOST_META_SITE),
            ("https://example.com/site-xrd", SITE_XRD),
        ]);
        let records = engine
            .discover(&Identifier::site("example.com"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].endpoint.as_str(), "https://op.example.com/endpoint");
        assert_eq!(records[0].version, ProtocolVersion::Server);
    }

    #[tokio::test]
    async fn site_without_pointer_is_an_empty_result() {
        let engine = discoverer(vec![(
            "https://example.com/.well-known/host-meta",
            "Link: <https://example.com/other>; rel=alternate\n",
        )]);
        let records = engine
            .discover(&Identifier::site("example.com"))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn user_discovery_prefers_a_matching_link_pattern() {
        let engine = discoverer(vec![
            (
                "https://bob.example.com/.well-known/host-meta",
                HOST_META_USER_PATTERN,
            ),
            (
                "https://example.com/user?uri=http%3A%2F%2Fbob.example.com%2Fid",
                USER_XRD,
            ),
        ]);
        let claimed = Identifier::claimed("http://bob.example.com/id").unwrap();
        let records = engine.discover(&claimed).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, ProtocolVersion::Signon);
        assert_eq!(
            records[0].claimed_id.as_ref().map(Url::as_str),
            Some("http://bob.example.com/id")
        );
    }

    #[tokio::test]
    async fn user_discovery_without_pointer_fails_typed() {
        let engine = discoverer(vec![(
            "https://bob.example.com/.well-known/host-meta",
            "Link: <https://example.com/other>; rel=alternate\n",
        )]);
        let claimed = Identifier::claimed("http://bob.example.com/id").unwrap();
        let result = engine.discover(&claimed).await;
        assert!(matches!(
            result,
            Err(DiscoveryError::NoMetadataPointer { .. })
        ));
    }

    struct FixedLegacy {
        endpoint: &'static str,
    }

    #[async_trait]
    impl LegacyDiscovery for FixedLegacy {
        async fn discover(
            &self,
            _identifier: &str,
        ) -> Result<Vec<LegacyEndpoint>, DiscoveryError> {
            Ok(vec![LegacyEndpoint {
                endpoint: Url::parse(self.endpoint).unwrap(),
                claimed_id: None,
                local_id: None,
                version: ProtocolVersion::Server,
            }])
        }
    }

    struct RecordingLegacy {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LegacyDiscovery for RecordingLegacy {
        async fn discover(
            &self,
            identifier: &str,
        ) -> Result<Vec<LegacyEndpoint>, DiscoveryError> {
            self.seen.lock().unwrap().push(identifier.to_string());
            Err(DiscoveryError::Legacy("nothing found".to_string()))
        }
    }

    #[tokio::test]
    async fn legacy_fallback_catches_failures_and_marks_records_insecure() {
        let engine = discoverer(Vec::new()).with_legacy(Arc::new(FixedLegacy {
            endpoint: "https://legacy.example.com/endpoint",
        }));
        let records = engine
            .discover(&Identifier::site("example.com"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].endpoint.as_str(),
            "https://legacy.example.com/endpoint"
        );
        assert!(!records[0].secure);
    }

    #[tokio::test]
    async fn legacy_fallback_also_catches_empty_results() {
        let engine = discoverer(vec![(
            "https://example.com/.well-known/host-meta",
            "Link: <https://example.com/other>; rel=alternate\n",
        )])
        .with_legacy(Arc::new(FixedLegacy {
            endpoint: "https://legacy.example.com/endpoint",
        }));
        let records = engine
            .discover(&Identifier::site("example.com"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn legacy_receives_a_synthesized_site_url() {
        let legacy = Arc::new(RecordingLegacy {
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let engine = discoverer(Vec::new()).with_legacy(legacy.clone());
        let _ = engine.discover(&Identifier::site("example.com")).await;
        assert_eq!(legacy.seen.lock().unwrap().as_slice(), ["http://example.com/"]);
    }

    #[tokio::test]
    async fn without_legacy_the_new_style_error_propagates() {
        let engine = discoverer(Vec::new());
        let result = engine.discover(&Identifier::site("example.com")).await;
        assert!(matches!(result, Err(DiscoveryError::Fetch(_))));
    }
}
