//! Link grammar: a single `Link:` / `Link-Pattern:` declaration.
//!
//! One line of host metadata has the shape
//!
//! ```text
//! Link: <https://example.com/xrd>; rel="describedby http://specs.openid.net/auth/2.5/xrd-op"; type=application/xrds+xml
//! ```
//!
//! The declaration label is matched case-insensitively; parameter keys are
//! case-sensitive. Relation tokens normalize against the IANA relation
//! namespace unless they already carry a scheme.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use url::Url;

/// Base namespace bare relation tokens are normalized against.
pub const IANA_RELATION_BASE: &str = "http://www.iana.org/assignments/relation/";

/// Errors produced while parsing a single link declaration.
///
/// These are recovered locally by the host-meta scanner: a line that fails
/// to parse is skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkParseError {
    /// The label before the first `:` is not `Link` or `Link-Pattern`.
    #[error("unrecognized declaration label: {0:?}")]
    UnknownLabel(String),

    /// No `<...>` delimited target after the label.
    #[error("missing <...> delimited link target")]
    MissingTarget,

    /// A `Link:` target did not parse as an absolute URI.
    #[error("invalid link target URI: {0:?}")]
    InvalidTarget(String),

    /// A parameter was not of the form `name=value`.
    #[error("malformed parameter: {0:?}")]
    MalformedParameter(String),

    /// An unquoted parameter value contained whitespace.
    #[error("unquoted parameter value contains whitespace: {0:?}")]
    WhitespaceInValue(String),

    /// A quoted string was never closed.
    #[error("unterminated quoted string")]
    UnterminatedQuote,

    /// A relation token did not normalize to a syntactically valid URI.
    #[error("invalid relation type: {0:?}")]
    InvalidRelation(String),
}

/// A relation type: a URI tag classifying what a link points to.
///
/// Bare tokens (no scheme) normalize against [`IANA_RELATION_BASE`];
/// anything already carrying a scheme passes through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationType(String);

impl RelationType {
    /// Normalize and validate a relation token.
    ///
    /// # Errors
    ///
    /// Returns [`LinkParseError::InvalidRelation`] if the normalized form is
    /// not a syntactically valid URI.
    pub fn new(token: &str) -> Result<Self, LinkParseError> {
        let normalized = if token.contains(':') {
            token.to_string()
        } else {
            format!("{IANA_RELATION_BASE}{token}")
        };
        Url::parse(&normalized)
            .map_err(|_| LinkParseError::InvalidRelation(token.to_string()))?;
        Ok(Self(normalized))
    }

    /// The normalized relation URI.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An unordered set of relation types supporting containment queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationTypeSet(BTreeSet<RelationType>);

impl RelationTypeSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from already-normalized relation URIs.
    ///
    /// # Errors
    ///
    /// Returns [`LinkParseError::InvalidRelation`] for any invalid token.
    pub fn from_tokens<'a>(
        tokens: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, LinkParseError> {
        let mut set = Self::new();
        for token in tokens {
            set.insert(RelationType::new(token)?);
        }
        Ok(set)
    }

    /// Add a relation type; later additions accumulate, never replace.
    pub fn insert(&mut self, relation: RelationType) {
        self.0.insert(relation);
    }

    /// Whether the set contains the given normalized relation URI.
    pub fn contains(&self, relation: &RelationType) -> bool {
        self.0.contains(relation)
    }

    /// Whether this set contains every relation in `other`.
    pub fn is_superset_of(&self, other: &RelationTypeSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Number of relation types in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the relation types in normalized order.
    pub fn iter(&self) -> impl Iterator<Item = &RelationType> {
        self.0.iter()
    }
}

/// The target of a link declaration.
///
/// `Link:` declarations carry an already-resolved absolute URI;
/// `Link-Pattern:` declarations carry an unresolved template string that
/// becomes a URI only after `{%uri}` substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Resolved absolute URI.
    Resolved(Url),

    /// Unresolved template string (may contain `{%uri}`).
    Template(String),
}

/// A parsed link declaration.
///
/// Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// The declaration target.
    pub target: LinkTarget,

    /// Accumulated relation types from all `rel=` parameters.
    pub relations: RelationTypeSet,

    /// Value of the `type=` parameter, if present.
    pub mime_type: Option<String>,

    /// All parameters as written, including the raw unparsed `rel` value.
    pub params: BTreeMap<String, String>,
}

impl Link {
    /// The resolved target URI, if this is a plain `Link:` declaration.
    pub fn target_url(&self) -> Option<&Url> {
        match &self.target {
            LinkTarget::Resolved(url) => Some(url),
            LinkTarget::Template(_) => None,
        }
    }

    /// The unresolved template string, if this is a `Link-Pattern:`.
    pub fn template(&self) -> Option<&str> {
        match &self.target {
            LinkTarget::Resolved(_) => None,
            LinkTarget::Template(template) => Some(template),
        }
    }

    /// Whether this declaration is a `Link-Pattern:`.
    pub fn is_pattern(&self) -> bool {
        matches!(self.target, LinkTarget::Template(_))
    }
}

/// Parse one `Link:` or `Link-Pattern:` declaration.
///
/// # Errors
///
/// Returns [`LinkParseError`] on any syntax violation; callers treat these
/// as per-line diagnostics, not fatal conditions.
pub fn parse_link(line: &str) -> Result<Link, LinkParseError> {
    let (label, rest) = line
        .split_once(':')
        .ok_or_else(|| LinkParseError::UnknownLabel(line.trim().to_string()))?;

    let label = label.trim();
    let is_pattern = if label.eq_ignore_ascii_case("link") {
        false
    } else if label.eq_ignore_ascii_case("link-pattern") {
        true
    } else {
        return Err(LinkParseError::UnknownLabel(label.to_string()));
    };

    let rest = rest.trim_start();
    let rest = rest.strip_prefix('<').ok_or(LinkParseError::MissingTarget)?;
    let (target_str, mut rest) = rest
        .split_once('>')
        .ok_or(LinkParseError::MissingTarget)?;

    let target = if is_pattern {
        LinkTarget::Template(target_str.to_string())
    } else {
        let url = Url::parse(target_str)
            .map_err(|_| LinkParseError::InvalidTarget(target_str.to_string()))?;
        LinkTarget::Resolved(url)
    };

    let mut relations = RelationTypeSet::new();
    let mut mime_type = None;
    let mut params = BTreeMap::new();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest
            .strip_prefix(';')
            .ok_or_else(|| LinkParseError::MalformedParameter(rest.to_string()))?
            .trim_start();
        if rest.is_empty() {
            break;
        }

        let eq = rest
            .find(['=', ';'])
            .filter(|&i| rest.as_bytes()[i] == b'=')
            .ok_or_else(|| {
                LinkParseError::MalformedParameter(
                    rest.split(';').next().unwrap_or(rest).trim().to_string(),
                )
            })?;
        let name = rest[..eq].trim();
        if name.is_empty() {
            return Err(LinkParseError::MalformedParameter(rest.to_string()));
        }
        rest = rest[eq + 1..].trim_start();

        let raw_value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let (value, remainder) = scan_quoted(quoted)?;
            raw_value = value;
            rest = remainder;
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            let value = rest[..end].trim_end();
            if value.chars().any(char::is_whitespace) {
                return Err(LinkParseError::WhitespaceInValue(value.to_string()));
            }
            raw_value = value.to_string();
            rest = &rest[end..];
        }

        if name == "rel" {
            for token in raw_value.split_whitespace() {
                relations.insert(RelationType::new(token)?);
            }
            // Retain the raw value for diagnostics; repeated declarations
            // accumulate the same way the parsed set does.
            params
                .entry("rel".to_string())
                .and_modify(|existing: &mut String| {
                    existing.push(' ');
                    existing.push_str(&raw_value);
                })
                .or_insert(raw_value);
        } else {
            if name == "type" {
                mime_type = Some(raw_value.clone());
            }
            params.insert(name.to_string(), raw_value);
        }
    }

    Ok(Link {
        target,
        relations,
        mime_type,
        params,
    })
}

/// Scan a quoted string body, stopping at the first unescaped closing quote.
///
/// Returns the unescaped content and the unconsumed remainder of the line.
fn scan_quoted(input: &str) -> Result<(String, &str), LinkParseError> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[i + 1..])),
            '\\' => {
                let (_, escaped) = chars.next().ok_or(LinkParseError::UnterminatedQuote)?;
                value.push(escaped);
            }
            other => value.push(other),
        }
    }
    Err(LinkParseError::UnterminatedQuote)
}
