//! Certificate trust validation with a bounded, time-expiring cache.
//!
//! [`PkixChainValidator`] validates an X.509 chain against a configured
//! [`TrustStore`]; [`TrustResolver`] wraps any [`ChainValidator`] with a
//! capacity-bounded, TTL-expiring, recency-evicting cache keyed by the exact
//! ordered certificate chain, so repeated discovery calls skip path building.
//! Authority matching is re-evaluated per call and never cached.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use x509_parser::prelude::*;

/// How long a positive validation stays cached.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Maximum number of cached validations.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Conventional CA bundle locations probed when no explicit trust roots are
/// supplied and `SSL_CERT_FILE` is unset.
const CA_BUNDLE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

/// Trust validation errors.
#[derive(Debug, Clone, Error)]
pub enum TrustError {
    /// The chain was empty.
    #[error("empty certificate chain")]
    EmptyChain,

    /// A certificate in the chain failed to parse.
    #[error("failed to parse certificate at depth {depth}: {reason}")]
    CertParse { depth: usize, reason: String },

    /// A certificate is outside its validity window at the validation time.
    #[error("certificate {subject} is outside its validity window")]
    Expired { subject: String },

    /// A certificate's signature did not verify against its issuer's key.
    #[error("signature on certificate {subject} does not verify against its issuer")]
    BrokenLink { subject: String },

    /// The chain does not terminate at a configured trust anchor.
    #[error("certificate chain does not terminate at a configured trust anchor")]
    NoTrustAnchor,

    /// The leaf certificate does not identify the expected authority.
    #[error("leaf certificate does not match authority {0:?}")]
    AuthorityMismatch(String),

    /// No usable trust anchors could be loaded.
    #[error("no trust anchors available: {0}")]
    NoAnchors(String),
}

fn asn1_time(at: SystemTime) -> Result<ASN1Time, TrustError> {
    let seconds = at
        .duration_since(UNIX_EPOCH)
        .map_err(|_| TrustError::NoTrustAnchor)?
        .as_secs();
    ASN1Time::from_timestamp(seconds as i64).map_err(|_| TrustError::NoTrustAnchor)
}

/// An immutable set of DER-encoded X.509 trust anchors.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    anchors: Vec<Vec<u8>>,
}

impl TrustStore {
    /// Build a store from DER-encoded certificates.
    pub fn from_der(anchors: Vec<Vec<u8>>) -> Self {
        Self { anchors }
    }

    /// Build a store from a PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::NoAnchors`] if no certificate could be read.
    pub fn from_pem(bundle: &[u8]) -> Result<Self, TrustError> {
        let mut anchors = Vec::new();
        for pem in Pem::iter_from_buffer(bundle) {
            match pem {
                Ok(pem) if pem.label == "CERTIFICATE" || pem.label == "TRUSTED CERTIFICATE" => {
                    anchors.push(pem.contents);
                }
                Ok(_) => {}
                Err(e) => {
                    // Trailing garbage after valid certificates is tolerated.
                    if anchors.is_empty() {
                        return Err(TrustError::NoAnchors(e.to_string()));
                    }
                    break;
                }
            }
        }
        if anchors.is_empty() {
            return Err(TrustError::NoAnchors(
                "no certificates in PEM bundle".to_string(),
            ));
        }
        Ok(Self { anchors })
    }

    /// Load the platform's standard TLS CA trust store.
    ///
    /// Honors `SSL_CERT_FILE`, then probes the conventional bundle paths.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::NoAnchors`] if no bundle could be located.
    pub fn system() -> Result<Self, TrustError> {
        if let Ok(path) = std::env::var("SSL_CERT_FILE") {
            let bundle = std::fs::read(&path)
                .map_err(|e| TrustError::NoAnchors(format!("{path}: {e}")))?;
            return Self::from_pem(&bundle);
        }
        for path in CA_BUNDLE_PATHS {
            if let Ok(bundle) = std::fs::read(path) {
                return Self::from_pem(&bundle);
            }
        }
        Err(TrustError::NoAnchors(
            "no system CA bundle found".to_string(),
        ))
    }

    /// Number of anchors in the store.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    fn contains(&self, der: &[u8]) -> bool {
        self.anchors.iter().any(|anchor| anchor == der)
    }

    /// Whether some anchor issued (and its key verifies) the given
    /// certificate.
    fn anchors_issuer_of(&self, cert: &X509Certificate<'_>) -> bool {
        for anchor_der in &self.anchors {
            let Ok((_, anchor)) = X509Certificate::from_der(anchor_der) else {
                continue;
            };
            if anchor.subject().as_raw() == cert.issuer().as_raw()
                && cert.verify_signature(Some(anchor.public_key())).is_ok()
            {
                return true;
            }
        }
        false
    }
}

/// Validates an ordered, leaf-first certificate chain at a point in time.
///
/// Object-safe so tests can substitute call-counting fakes.
pub trait ChainValidator: Send + Sync {
    /// Validate the chain; `at` is the validation "current time".
    ///
    /// # Errors
    ///
    /// Returns [`TrustError`] describing the first check that failed.
    fn validate(&self, chain_der: &[Vec<u8>], at: SystemTime) -> Result<(), TrustError>;
}

/// PKIX path validation against a [`TrustStore`].
///
/// Checks, in order: parseability, validity windows, per-link signatures,
/// and trust anchoring (the chain's last certificate is an anchor, or is
/// directly issued by one). Revocation checking is disabled.
pub struct PkixChainValidator {
    store: TrustStore,
}

impl PkixChainValidator {
    /// Create a validator over an explicit trust store.
    pub fn new(store: TrustStore) -> Self {
        Self { store }
    }

    /// Create a validator over the platform trust store.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::NoAnchors`] if no system bundle is available.
    pub fn with_system_roots() -> Result<Self, TrustError> {
        Ok(Self::new(TrustStore::system()?))
    }
}

impl ChainValidator for PkixChainValidator {
    fn validate(&self, chain_der: &[Vec<u8>], at: SystemTime) -> Result<(), TrustError> {
        if chain_der.is_empty() {
            return Err(TrustError::EmptyChain);
        }

        let parsed: Vec<X509Certificate<'_>> = chain_der
            .iter()
            .enumerate()
            .map(|(depth, der)| {
                X509Certificate::from_der(der)
                    .map(|(_, cert)| cert)
                    .map_err(|e| TrustError::CertParse {
                        depth,
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;

        let at = asn1_time(at)?;
        for cert in &parsed {
            if !cert.validity().is_valid_at(at) {
                return Err(TrustError::Expired {
                    subject: cert.subject().to_string(),
                });
            }
        }

        for pair in parsed.windows(2) {
            if pair[0].verify_signature(Some(pair[1].public_key())).is_err() {
                return Err(TrustError::BrokenLink {
                    subject: pair[0].subject().to_string(),
                });
            }
        }

        // Anchoring: the chain's last certificate is itself an anchor, or an
        // anchor issued it.
        let last_der = chain_der.last().map(Vec::as_slice).unwrap_or_default();
        let last = parsed.last().ok_or(TrustError::EmptyChain)?;
        if self.store.contains(last_der) || self.store.anchors_issuer_of(last) {
            Ok(())
        } else {
            Err(TrustError::NoTrustAnchor)
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    expires_at: SystemTime,
    last_used: SystemTime,
}

/// A [`ChainValidator`] front-end with a bounded, TTL-expiring cache.
///
/// The cache is keyed by the exact ordered certificate chain; a hit skips
/// path building entirely. Shared across concurrent discovery calls.
pub struct TrustResolver {
    validator: Box<dyn ChainValidator>,
    cache: DashMap<Vec<Vec<u8>>, CacheEntry>,
    ttl: Duration,
    capacity: usize,
}

impl TrustResolver {
    /// Wrap a validator with default cache limits.
    pub fn new(validator: impl ChainValidator + 'static) -> Self {
        Self::with_limits(validator, DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }

    /// Wrap a validator with explicit cache limits.
    pub fn with_limits(
        validator: impl ChainValidator + 'static,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            validator: Box::new(validator),
            cache: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Validate a chain at the current wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError`] from the underlying validator on failure;
    /// failures are never cached.
    pub fn validate_chain(&self, chain_der: &[Vec<u8>]) -> Result<(), TrustError> {
        self.validate_chain_at(chain_der, SystemTime::now())
    }

    /// Validate a chain at an explicit point in time.
    ///
    /// `at` drives both path validation and cache expiry, which keeps the
    /// behavior deterministic under test.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError`] from the underlying validator on failure.
    pub fn validate_chain_at(
        &self,
        chain_der: &[Vec<u8>],
        at: SystemTime,
    ) -> Result<(), TrustError> {
        if let Some(mut entry) = self.cache.get_mut(chain_der) {
            if at < entry.expires_at {
                entry.last_used = at;
                debug!("trust validation cache hit");
                return Ok(());
            }
        }
        self.cache.remove(chain_der);

        self.validator.validate(chain_der, at)?;

        self.evict(at);
        self.cache.insert(
            chain_der.to_vec(),
            CacheEntry {
                expires_at: at + self.ttl,
                last_used: at,
            },
        );
        Ok(())
    }

    /// Check that the chain's leaf certificate identifies `authority`.
    ///
    /// Strategies, any of which may match: the subject common name equals
    /// the authority; a SAN dNSName equals it; or, when the authority parses
    /// as a URL, either equals that URL's host. Never cached.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::AuthorityMismatch`] when no strategy matches.
    pub fn check_authority(leaf_der: &[u8], authority: &str) -> Result<(), TrustError> {
        let (_, leaf) = X509Certificate::from_der(leaf_der).map_err(|e| TrustError::CertParse {
            depth: 0,
            reason: e.to_string(),
        })?;

        let mut candidates: Vec<String> = vec![authority.to_string()];
        if let Ok(url) = Url::parse(authority) {
            if let Some(host) = url.host_str() {
                candidates.push(host.to_string());
            }
        }

        for cn in leaf.subject().iter_common_name() {
            if let Ok(name) = cn.as_str() {
                if candidates.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                    return Ok(());
                }
            }
        }
        if let Ok(Some(san)) = leaf.subject_alternative_name() {
            for general_name in &san.value.general_names {
                if let GeneralName::DNSName(name) = general_name {
                    if candidates.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                        return Ok(());
                    }
                }
            }
        }

        warn!(authority, "leaf certificate matched no authority strategy");
        Err(TrustError::AuthorityMismatch(authority.to_string()))
    }

    /// Number of cached validations.
    pub fn cached_validations(&self) -> usize {
        self.cache.len()
    }

    fn evict(&self, now: SystemTime) {
        if self.cache.len() < self.capacity {
            return;
        }
        self.cache.retain(|_, entry| now < entry.expires_at);
        while self.cache.len() >= self.capacity {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|entry| entry.value().last_used)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.cache.remove(&key);
                }
                None => break,
            }
        }
    }
}
