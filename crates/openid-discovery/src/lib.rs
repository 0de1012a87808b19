//! Secure endpoint discovery for federated identities.
//!
//! Given a site or claimed identifier, this crate walks the discovery
//! chain (well-known host metadata, link selection, XRD resource
//! descriptors) down to concrete authentication endpoints, and decides per
//! document whether it was obtained *securely*: signed with a detached
//! RSA/SHA-1 signature whose certificate chain validates against configured
//! trust roots and matches the expected authority at every hop.
//!
//! # Architecture
//!
//! - [`discovery::Discoverer`]: the orchestrator. Host metadata in,
//!   discovery records out, with an optional legacy fallback.
//! - [`hostmeta`]: the lenient `Link:` / `Link-Pattern:` grammar and
//!   document model.
//! - [`selector`]: relation-priority selection of descriptor pointers.
//! - [`template`]: `{%uri}` template expansion.
//! - [`xrds`]: XRD parsing and resolution into records.
//! - [`signature`] / [`trust`]: detached-signature verification and cached
//!   X.509 chain validation.
//! - [`http`]: the narrow fetch trait everything else depends on.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use openid_discovery::{
//!     Discoverer, Identifier, PkixChainValidator, ReqwestFetcher, TrustResolver,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let http = Arc::new(ReqwestFetcher::new()?);
//! let trust = Arc::new(TrustResolver::new(PkixChainValidator::with_system_roots()?));
//! let discoverer = Discoverer::new(http, trust);
//!
//! let records = discoverer.discover(&Identifier::site("example.com")).await?;
//! for record in records {
//!     println!("{} (secure: {})", record.endpoint, record.secure);
//! }
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod hostmeta;
pub mod http;
pub mod selector;
pub mod signature;
pub mod template;
pub mod trust;
pub mod types;
pub mod xrds;

pub use discovery::{Discoverer, DiscoveryError, LegacyDiscovery, LegacyEndpoint};
pub use http::{FetchConfig, FetchError, FetchResponse, HttpFetch, Method, ReqwestFetcher};
pub use signature::{SignatureError, SignatureSource, SignatureVerifier};
pub use trust::{ChainValidator, PkixChainValidator, TrustError, TrustResolver, TrustStore};
pub use types::{DiscoveryRecord, Identifier, ProtocolVersion};
pub use xrds::{XrdDocument, XrdError, XrdResolver, XrdService};
