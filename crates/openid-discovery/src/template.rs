//! URI template mapping: `{%uri}` substitution inside link patterns.

use thiserror::Error;
use url::Url;

/// The single placeholder token recognized inside link patterns.
pub const URI_PLACEHOLDER: &str = "{%uri}";

/// Errors from template expansion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Expansion produced a string that is not a valid absolute URI.
    #[error("template expansion produced an invalid URI: {0:?}")]
    InvalidResult(String),
}

/// Substitute an identifier into every `{%uri}` occurrence of `pattern`.
///
/// The identifier is percent-encoded before substitution so it can be
/// embedded anywhere in the pattern, including query values.
///
/// # Errors
///
/// Returns [`TemplateError::InvalidResult`] if the expanded string does not
/// parse as an absolute URI.
pub fn expand(pattern: &str, identifier: &str) -> Result<Url, TemplateError> {
    let encoded = urlencoding::encode(identifier);
    let expanded = pattern.replace(URI_PLACEHOLDER, &encoded);
    Url::parse(&expanded).map_err(|_| TemplateError::InvalidResult(expanded))
}
