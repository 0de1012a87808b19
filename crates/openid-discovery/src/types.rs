//! Core discovery types: identifiers and resolved discovery records.

use url::Url;

/// The kind of identifier a discovery call starts from.
///
/// The tag determines which discovery path is taken: site identifiers
/// resolve to provider endpoints directly, claimed identifiers walk the
/// user-level document chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// A bare identity-provider host name, e.g. `example.com`.
    Site(String),

    /// The full URL a user asserts as their identity.
    Claimed(Url),
}

impl Identifier {
    /// Create a site identifier from a host name.
    pub fn site(host: impl Into<String>) -> Self {
        Self::Site(host.into())
    }

    /// Create a claimed identifier from a user-asserted URL.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error if the value is not an absolute URL.
    pub fn claimed(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::Claimed(Url::parse(url)?))
    }

    /// The host the identifier belongs to, if one can be derived.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Site(host) => Some(host.as_str()),
            Self::Claimed(url) => url.host_str(),
        }
    }

    /// The identifier string handed to the legacy discovery engine.
    ///
    /// Site identifiers synthesize a base URL for the host, defaulting to
    /// the `http` scheme when none was given. Claimed identifiers pass
    /// through as their full URL.
    pub fn legacy_identifier(&self) -> String {
        match self {
            Self::Site(host) => {
                if host.contains("://") {
                    host.clone()
                } else {
                    format!("http://{host}/")
                }
            }
            Self::Claimed(url) => url.to_string(),
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Site(host) => f.write_str(host),
            Self::Claimed(url) => f.write_str(url.as_str()),
        }
    }
}

/// Which endpoint protocol a discovery record resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// User authentication endpoint (`.../auth/2.0/signon`).
    Signon,

    /// Provider (OP) endpoint (`.../auth/2.0/server`).
    Server,
}

/// A resolved authentication endpoint.
///
/// `secure` is true only if every document in the chain that produced this
/// record was signed by, and attributable to, the expected authority.
/// Records produced by the legacy fallback are always insecure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    /// The endpoint to perform authentication against.
    pub endpoint: Url,

    /// The claimed identifier the record was resolved for, if any.
    pub claimed_id: Option<Url>,

    /// Provider-local identifier embedded in the user document, if any.
    pub local_id: Option<String>,

    /// Endpoint protocol version.
    pub version: ProtocolVersion,

    /// Whether the full document chain verified as signed by the expected
    /// authority at every hop.
    pub secure: bool,
}
