//! Host metadata: the well-known, line-oriented per-host capability document.
//!
//! The format is deliberately lenient and best-effort, not a strict grammar:
//! blank lines and `#` comments are ignored, and any line that is not a
//! valid `Link:` / `Link-Pattern:` declaration is skipped with a warning.

pub mod link;

use tracing::warn;

pub use link::{Link, LinkParseError, LinkTarget, RelationType, RelationTypeSet};

/// An ordered collection of parsed `Link` and `Link-Pattern` declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMeta {
    links: Vec<Link>,
    link_patterns: Vec<Link>,
}

impl HostMeta {
    /// Parse a host-metadata document from raw bytes.
    ///
    /// The input is decoded as UTF-8 with invalid sequences replaced; the
    /// format is line-oriented, so a bad byte corrupts at most the lines it
    /// touches. Malformed lines are logged and skipped, never fatal.
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut doc = Self::default();

        for (number, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match link::parse_link(trimmed) {
                Ok(link) if link.is_pattern() => doc.link_patterns.push(link),
                Ok(link) => doc.links.push(link),
                Err(error) => {
                    warn!(line = number + 1, %error, "skipping unparsable host-meta line");
                }
            }
        }

        doc
    }

    /// Parsed `Link:` declarations, in document order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Parsed `Link-Pattern:` declarations, in document order.
    pub fn link_patterns(&self) -> &[Link] {
        &self.link_patterns
    }

    /// Whether the document carries no declarations at all.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.link_patterns.is_empty()
    }
}
