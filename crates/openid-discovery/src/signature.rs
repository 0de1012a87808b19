//! Detached-signature verification for XRD documents.
//!
//! The signature is delivered separately from the signed bytes, either in
//! an HTTP `Signature` response header or by a side-fetch from an
//! in-document `SignatureLocation`, and covers the raw document octets
//! exactly as received. Only raw-octet canonicalization with RSA/SHA-1 is accepted;
//! anything else is rejected outright, never silently downgraded.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::debug;
use url::Url;
use x509_parser::prelude::*;

use crate::http::{FetchError, HttpFetch, Method};
use crate::trust::{TrustError, TrustResolver};

/// The only accepted canonicalization method: the signature covers the raw
/// document octets exactly as fetched.
pub const CANONICALIZATION_RAW_OCTETS: &str =
    "http://docs.oasis-open.org/xri/xrd/2009/01#canonicalize-raw-octets";

/// The only accepted signature method.
pub const SIGNATURE_METHOD_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";

const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Signature verification errors.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The signed document is not well-formed XML.
    #[error("signed document is not well-formed XML: {0}")]
    Xml(String),

    /// The document carries no signature metadata.
    #[error("document carries no signature metadata")]
    MissingSignedInfo,

    /// Canonicalization method other than raw octets.
    #[error("unsupported canonicalization method: {0:?}")]
    UnsupportedCanonicalization(String),

    /// Signature method other than RSA/SHA-1.
    #[error("unsupported signature method: {0:?}")]
    UnsupportedSignatureMethod(String),

    /// The key-info section carries no certificates.
    #[error("document carries no certificates in its key-info section")]
    MissingCertificates,

    /// A key-info certificate is not valid base64/DER.
    #[error("certificate at position {position} is malformed: {reason}")]
    MalformedCertificate { position: usize, reason: String },

    /// The signature value is not valid base64.
    #[error("signature value is not valid base64: {0}")]
    MalformedSignature(String),

    /// The signer's public key is not an RSA key.
    #[error("signer public key is not an RSA key: {0}")]
    UnsupportedKey(String),

    /// The signature does not match the document bytes.
    #[error("signature does not match document contents")]
    InvalidSignature,

    /// Fetching the detached signature bytes failed.
    #[error("failed to fetch detached signature: {0}")]
    SignatureFetch(#[from] FetchError),

    /// The signer's certificate chain is not trusted for the authority.
    #[error("signer certificate chain is not trusted: {0}")]
    Untrusted(#[from] TrustError),
}

/// Where the detached signature comes from.
#[derive(Debug, Clone)]
pub enum SignatureSource {
    /// A base64 value already known, e.g. from a `Signature` response header.
    Value(String),

    /// A URL the raw base64 signature bytes must be fetched from.
    Location(Url),
}

/// Verifies a detached RSA/SHA-1 signature over raw document octets against
/// the certificate chain embedded in the document's key-info section, then
/// asks the trust resolver whether that chain is acceptable for the claimed
/// authority.
pub struct SignatureVerifier {
    http: Arc<dyn HttpFetch>,
    trust: Arc<TrustResolver>,
}

impl SignatureVerifier {
    /// Create a verifier over the given fetch and trust collaborators.
    pub fn new(http: Arc<dyn HttpFetch>, trust: Arc<TrustResolver>) -> Self {
        Self { http, trust }
    }

    /// Verify `raw` against the detached signature and `authority`.
    ///
    /// Returns the validated certificate chain (leaf first, DER encoded) on
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] on algorithm mismatch, missing or
    /// malformed certificates, signature mismatch, or trust failure.
    pub async fn verify(
        &self,
        raw: &[u8],
        source: SignatureSource,
        authority: &str,
    ) -> Result<Vec<Vec<u8>>, SignatureError> {
        let signature = self.signature_bytes(source).await?;
        let chain = Self::check_document(raw, &signature)?;

        self.trust.validate_chain(&chain)?;
        TrustResolver::check_authority(&chain[0], authority)?;

        debug!(authority, "detached signature verified");
        Ok(chain)
    }

    /// Algorithm gates, certificate extraction, and the RSA/SHA-1 check.
    fn check_document(raw: &[u8], signature: &[u8]) -> Result<Vec<Vec<u8>>, SignatureError> {
        let text =
            std::str::from_utf8(raw).map_err(|e| SignatureError::Xml(e.to_string()))?;
        let doc = roxmltree::Document::parse_with_options(
            text,
            roxmltree::ParsingOptions {
                allow_dtd: false,
                ..roxmltree::ParsingOptions::default()
            },
        )
        .map_err(|e| SignatureError::Xml(e.to_string()))?;

        let signed_info = doc
            .descendants()
            .find(|node| {
                node.is_element()
                    && node.tag_name().name() == "SignedInfo"
                    && node.tag_name().namespace() == Some(DSIG_NS)
            })
            .ok_or(SignatureError::MissingSignedInfo)?;

        let canonicalization = dsig_algorithm(signed_info, "CanonicalizationMethod")
            .ok_or(SignatureError::MissingSignedInfo)?;
        if canonicalization != CANONICALIZATION_RAW_OCTETS {
            return Err(SignatureError::UnsupportedCanonicalization(
                canonicalization.to_string(),
            ));
        }
        let method = dsig_algorithm(signed_info, "SignatureMethod")
            .ok_or(SignatureError::MissingSignedInfo)?;
        if method != SIGNATURE_METHOD_RSA_SHA1 {
            return Err(SignatureError::UnsupportedSignatureMethod(method.to_string()));
        }

        let chain = key_info_certificates(&doc)?;
        if chain.is_empty() {
            return Err(SignatureError::MissingCertificates);
        }

        let (_, leaf) = X509Certificate::from_der(&chain[0]).map_err(|e| {
            SignatureError::MalformedCertificate {
                position: 0,
                reason: e.to_string(),
            }
        })?;
        let public_key = RsaPublicKey::from_public_key_der(leaf.public_key().raw)
            .map_err(|e| SignatureError::UnsupportedKey(e.to_string()))?;

        let digest = Sha1::digest(raw);
        public_key
            .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
            .map_err(|_| SignatureError::InvalidSignature)?;

        Ok(chain)
    }

    async fn signature_bytes(
        &self,
        source: SignatureSource,
    ) -> Result<Vec<u8>, SignatureError> {
        let encoded = match source {
            SignatureSource::Value(value) => value,
            SignatureSource::Location(url) => {
                debug!(%url, "fetching detached signature");
                let response = self
                    .http
                    .fetch(Method::Get, &url)
                    .await?
                    .ensure_success(&url)?;
                String::from_utf8_lossy(response.body()).into_owned()
            }
        };
        let compact: String = encoded.split_whitespace().collect();
        BASE64
            .decode(compact.as_bytes())
            .map_err(|e| SignatureError::MalformedSignature(e.to_string()))
    }
}

fn dsig_algorithm<'a>(signed_info: roxmltree::Node<'a, 'a>, element: &str) -> Option<&'a str> {
    signed_info
        .children()
        .find(|node| {
            node.is_element()
                && node.tag_name().name() == element
                && node.tag_name().namespace() == Some(DSIG_NS)
        })
        .and_then(|node| node.attribute("Algorithm"))
}

/// Extract the ordered certificate list from `KeyInfo/X509Data`.
fn key_info_certificates(
    doc: &roxmltree::Document<'_>,
) -> Result<Vec<Vec<u8>>, SignatureError> {
    let mut chain = Vec::new();
    for (position, node) in doc
        .descendants()
        .filter(|node| {
            node.is_element()
                && node.tag_name().name() == "X509Certificate"
                && node.tag_name().namespace() == Some(DSIG_NS)
        })
        .enumerate()
    {
        let encoded: String = node
            .text()
            .unwrap_or_default()
            .split_whitespace()
            .collect();
        let der = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| SignatureError::MalformedCertificate {
                position,
                reason: e.to_string(),
            })?;
        chain.push(der);
    }
    Ok(chain)
}
