//! XRD resolution: fetching resource descriptors and turning their service
//! entries into discovery records, with a per-document security verdict.
//!
//! A document is secure only if it names exactly one canonical identifier
//! equal to what the chain expected for that hop, and its detached signature
//! verifies against the expected authority. A signature problem demotes the
//! document to insecure rather than aborting discovery; the records are
//! still useful, they just lose the `secure` claim.

pub mod document;

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::discovery::DiscoveryError;
use crate::http::{HttpFetch, Method};
use crate::signature::{SignatureSource, SignatureVerifier};
use crate::template;
use crate::trust::TrustResolver;
use crate::types::{DiscoveryRecord, ProtocolVersion};

pub use document::{XrdDocument, XrdError, XrdService};
pub use document::{TYPE_DESCRIBED_BY, TYPE_SERVER, TYPE_SIGNON};

/// Resolves XRD documents into discovery records.
pub struct XrdResolver {
    http: Arc<dyn HttpFetch>,
    verifier: SignatureVerifier,
}

impl XrdResolver {
    /// Create a resolver fetching over `http` and verifying signatures
    /// against `trust`.
    pub fn new(http: Arc<dyn HttpFetch>, trust: Arc<TrustResolver>) -> Self {
        let verifier = SignatureVerifier::new(http.clone(), trust);
        Self { http, verifier }
    }

    /// Site discovery: resolve the XRD at `xrd_url` into provider endpoints.
    ///
    /// `host` is the identifier this hop is expected to describe.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the document cannot be fetched or
    /// parsed, or carries no provider service entry.
    pub async fn discover_site(
        &self,
        xrd_url: &Url,
        host: &str,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        let fetched = self.fetch_document(xrd_url).await?;
        let secure = self.determine_secure(&fetched, host, None).await;

        let services = fetched.document.services_of_type(TYPE_SERVER);
        if services.is_empty() {
            return Err(DiscoveryError::MissingService {
                service_type: TYPE_SERVER.to_string(),
                url: xrd_url.to_string(),
            });
        }

        Ok(records_from_services(
            &services,
            ProtocolVersion::Server,
            None,
            secure,
        ))
    }

    /// Direct user discovery: resolve the user-level XRD at `xrd_url`.
    ///
    /// `authority_override`, when present, replaces the canonical identifier
    /// as the expected signer authority (chained delegation from a secure
    /// site hop).
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the document cannot be fetched or
    /// parsed, or carries no signon service entry.
    pub async fn discover_user_direct(
        &self,
        xrd_url: &Url,
        claimed: &Url,
        authority_override: Option<&str>,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        let fetched = self.fetch_document(xrd_url).await?;
        let secure = self
            .determine_secure(&fetched, claimed.as_str(), authority_override)
            .await;

        let services = fetched.document.services_of_type(TYPE_SIGNON);
        if services.is_empty() {
            return Err(DiscoveryError::MissingService {
                service_type: TYPE_SIGNON.to_string(),
                url: xrd_url.to_string(),
            });
        }

        Ok(records_from_services(
            &services,
            ProtocolVersion::Signon,
            Some(claimed),
            secure,
        ))
    }

    /// User discovery through a site-level XRD.
    ///
    /// The site document's `describedby` entry must carry a URI template,
    /// which is expanded with the claimed identifier to reach the user-level
    /// document. A `NextAuthority` hint in that entry overrides the expected
    /// signer authority for the user document, but only when the site
    /// document itself verified secure; an unsigned document must not be
    /// able to redirect trust. Records are secure only if both hops were.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when either document cannot be resolved,
    /// the site document lacks a `describedby` entry or URI template, or
    /// template expansion fails.
    pub async fn discover_user_via_site(
        &self,
        site_xrd_url: &Url,
        host: &str,
        claimed: &Url,
    ) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        let fetched = self.fetch_document(site_xrd_url).await?;
        let site_secure = self.determine_secure(&fetched, host, None).await;

        let services = fetched.document.services_of_type(TYPE_DESCRIBED_BY);
        let Some(entry) = services.first() else {
            return Err(DiscoveryError::MissingService {
                service_type: TYPE_DESCRIBED_BY.to_string(),
                url: site_xrd_url.to_string(),
            });
        };
        let Some(pattern) = entry.uri_template.as_deref() else {
            return Err(DiscoveryError::MissingTemplate {
                url: site_xrd_url.to_string(),
            });
        };

        let user_url = template::expand(pattern, claimed.as_str())?;
        debug!(%user_url, "following site descriptor to user document");

        let next_authority = if site_secure {
            entry.next_authority.as_deref()
        } else {
            if entry.next_authority.is_some() {
                warn!(url = %site_xrd_url, "ignoring NextAuthority on insecure site document");
            }
            None
        };

        let mut records = self
            .discover_user_direct(&user_url, claimed, next_authority)
            .await?;
        for record in &mut records {
            record.secure = record.secure && site_secure;
        }
        Ok(records)
    }

    async fn fetch_document(&self, url: &Url) -> Result<FetchedXrd, DiscoveryError> {
        let response = self
            .http
            .fetch(Method::Get, url)
            .await?
            .ensure_success(url)?;
        let header_signature = response.header("Signature").map(str::to_string);
        let document = XrdDocument::parse(response.body())?;
        Ok(FetchedXrd {
            document,
            header_signature,
        })
    }

    /// The per-document security verdict; never fails discovery.
    async fn determine_secure(
        &self,
        fetched: &FetchedXrd,
        expected_id: &str,
        authority_override: Option<&str>,
    ) -> bool {
        let Some(canonical) = fetched.document.canonical_id() else {
            debug!(expected_id, "document does not declare exactly one canonical id");
            return false;
        };
        if canonical != expected_id {
            warn!(canonical, expected_id, "canonical id does not match this hop");
            return false;
        }

        let source = match (&fetched.header_signature, fetched.document.signature_location()) {
            (Some(value), _) => SignatureSource::Value(value.clone()),
            (None, Some(location)) => SignatureSource::Location(location.clone()),
            (None, None) => {
                debug!(expected_id, "document carries no detached signature");
                return false;
            }
        };

        let authority = authority_override.unwrap_or(canonical);
        match self
            .verifier
            .verify(fetched.document.raw(), source, authority)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                warn!(authority, %error, "signature verification failed; treating document as insecure");
                false
            }
        }
    }
}

struct FetchedXrd {
    document: XrdDocument,
    header_signature: Option<String>,
}

/// One record per service entry, taking each entry's first parsable URI.
/// Entries with no usable URI are skipped with a warning.
fn records_from_services(
    services: &[&XrdService],
    version: ProtocolVersion,
    claimed: Option<&Url>,
    secure: bool,
) -> Vec<DiscoveryRecord> {
    let mut records = Vec::new();
    for service in services {
        let endpoint = service.uris.iter().find_map(|uri| match Url::parse(uri) {
            Ok(url) => Some(url),
            Err(error) => {
                warn!(uri, %error, "skipping unparsable service URI");
                None
            }
        });
        match endpoint {
            Some(endpoint) => records.push(DiscoveryRecord {
                endpoint,
                claimed_id: claimed.cloned(),
                local_id: service.local_id().map(str::to_string),
                version,
                secure,
            }),
            None => warn!("skipping service entry with no usable URI"),
        }
    }
    records
}
