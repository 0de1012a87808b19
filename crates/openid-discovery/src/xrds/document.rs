//! XRD document model: parsing and typed access to service entries.
//!
//! Parsing is eager: everything discovery needs is pulled out into owned
//! fields up front, while the raw bytes are retained untouched because the
//! detached signature covers them exactly as fetched. DTDs are rejected by
//! the parser, so external entity resolution is impossible; predefined
//! entities still resolve.

use thiserror::Error;
use tracing::warn;
use url::Url;

/// XRDS envelope namespace.
pub const XRDS_NS: &str = "xri://$xrds";

/// XRD 2.0 namespace.
pub const XRD_NS: &str = "xri://$xrd*($v*2.0)";

/// Service type of a provider (OP) endpoint.
pub const TYPE_SERVER: &str = "http://specs.openid.net/auth/2.0/server";

/// Service type of a user authentication endpoint.
pub const TYPE_SIGNON: &str = "http://specs.openid.net/auth/2.0/signon";

/// Service type linking a site document to its per-user documents.
pub const TYPE_DESCRIBED_BY: &str = "http://www.iana.org/assignments/relation/describedby";

/// XRD parsing errors.
#[derive(Debug, Clone, Error)]
pub enum XrdError {
    /// The document is not well-formed XML.
    #[error("resource descriptor is not well-formed XML: {0}")]
    Xml(String),

    /// The document contains no XRD element.
    #[error("document contains no XRD element")]
    NoDescriptor,
}

/// One `<Service>` entry of an XRD document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrdService {
    /// The `priority` attribute; smaller values are preferred, absent sorts
    /// after any numeric value. An unparsable attribute is treated as absent.
    pub priority: Option<u32>,

    /// `<Type>` child values.
    pub types: Vec<String>,

    /// `<URI>` child values, in document order.
    pub uris: Vec<String>,

    /// `<LocalID>` child values.
    pub local_ids: Vec<String>,

    /// `<URITemplate>` extension value, if any.
    pub uri_template: Option<String>,

    /// `<NextAuthority>` extension value, if any.
    pub next_authority: Option<String>,
}

impl XrdService {
    /// Whether the entry declares the given service type.
    pub fn has_type(&self, service_type: &str) -> bool {
        self.types.iter().any(|t| t == service_type)
    }

    /// The first declared local identifier, if any.
    pub fn local_id(&self) -> Option<&str> {
        self.local_ids.first().map(String::as_str)
    }
}

/// A parsed XRD document together with the exact bytes it came from.
#[derive(Debug, Clone)]
pub struct XrdDocument {
    raw: Vec<u8>,
    canonical_ids: Vec<String>,
    signature_location: Option<Url>,
    services: Vec<XrdService>,
}

impl XrdDocument {
    /// Parse an XRDS (or bare XRD) document.
    ///
    /// When the envelope carries several XRD elements, the last one is
    /// authoritative. Service entries with an unparsable `priority` are kept
    /// with the attribute treated as absent, after a warning.
    ///
    /// # Errors
    ///
    /// Returns [`XrdError`] for malformed XML or a document with no XRD
    /// element.
    pub fn parse(raw: &[u8]) -> Result<Self, XrdError> {
        let text = std::str::from_utf8(raw).map_err(|e| XrdError::Xml(e.to_string()))?;
        let doc = roxmltree::Document::parse_with_options(
            text,
            roxmltree::ParsingOptions {
                allow_dtd: false,
                ..roxmltree::ParsingOptions::default()
            },
        )
        .map_err(|e| XrdError::Xml(e.to_string()))?;

        let xrd = doc
            .descendants()
            .filter(|node| node.is_element() && node.tag_name().name() == "XRD")
            .last()
            .ok_or(XrdError::NoDescriptor)?;

        let mut canonical_ids = Vec::new();
        let mut signature_location = None;
        let mut services = Vec::new();

        for child in xrd.children().filter(roxmltree::Node::is_element) {
            match child.tag_name().name() {
                "CanonicalID" => {
                    if let Some(value) = element_text(child) {
                        canonical_ids.push(value);
                    }
                }
                "SignatureLocation" => {
                    signature_location = element_text(child)
                        .and_then(|value| match Url::parse(&value) {
                            Ok(url) => Some(url),
                            Err(error) => {
                                warn!(%error, "skipping unparsable SignatureLocation");
                                None
                            }
                        })
                        .or(signature_location);
                }
                "Service" => services.push(parse_service(child)),
                _ => {}
            }
        }

        Ok(Self {
            raw: raw.to_vec(),
            canonical_ids,
            signature_location,
            services,
        })
    }

    /// The exact bytes the document was parsed from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The canonical identifier, present only when the document declares
    /// exactly one.
    pub fn canonical_id(&self) -> Option<&str> {
        match self.canonical_ids.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// URL the detached signature can be fetched from, if declared.
    pub fn signature_location(&self) -> Option<&Url> {
        self.signature_location.as_ref()
    }

    /// All service entries, in document order.
    pub fn services(&self) -> &[XrdService] {
        &self.services
    }

    /// Service entries declaring `service_type`, best priority first.
    ///
    /// Smaller numeric priority wins; entries without a priority sort after
    /// all numbered ones; ties keep document order.
    pub fn services_of_type(&self, service_type: &str) -> Vec<&XrdService> {
        let mut matching: Vec<&XrdService> = self
            .services
            .iter()
            .filter(|service| service.has_type(service_type))
            .collect();
        matching.sort_by_key(|service| service.priority.map_or(u64::from(u32::MAX) + 1, u64::from));
        matching
    }
}

fn element_text(node: roxmltree::Node<'_, '_>) -> Option<String> {
    let text = node.text()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn parse_service(node: roxmltree::Node<'_, '_>) -> XrdService {
    let priority = node.attribute("priority").and_then(|value| {
        match value.parse::<u32>() {
            Ok(priority) => Some(priority),
            Err(_) => {
                warn!(priority = value, "ignoring unparsable service priority");
                None
            }
        }
    });

    let mut service = XrdService {
        priority,
        ..XrdService::default()
    };
    for child in node.children().filter(roxmltree::Node::is_element) {
        let Some(value) = element_text(child) else {
            continue;
        };
        match child.tag_name().name() {
            "Type" => service.types.push(value),
            "URI" => service.uris.push(value),
            "LocalID" => service.local_ids.push(value),
            "URITemplate" => service.uri_template = Some(value),
            "NextAuthority" => service.next_authority = Some(value),
            _ => {}
        }
    }
    service
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE_XRDS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xrds:XRDS xmlns:xrds="xri://$xrds" xmlns="xri://$xrd*($v*2.0)">
  <XRD>
    <CanonicalID>example.com</CanonicalID>
    <Service priority="20">
      <Type>http://specs.openid.net/auth/2.0/server</Type>
      <URI>https://op.example.com/backup</URI>
    </Service>
    <Service priority="10">
      <Type>http://specs.openid.net/auth/2.0/server</Type>
      <URI>https://op.example.com/endpoint</URI>
    </Service>
    <Service>
      <Type>http://specs.openid.net/auth/2.0/server</Type>
      <URI>https://op.example.com/unranked</URI>
    </Service>
    <Service priority="1">
      <Type>http://www.iana.org/assignments/relation/describedby</Type>
      <URITemplate>https://example.com/user-xrd?uri={%uri}</URITemplate>
      <NextAuthority>hosting.example.net</NextAuthority>
    </Service>
  </XRD>
</xrds:XRDS>
"#;

    #[test]
    fn services_sort_by_priority_with_missing_last() {
        let doc = XrdDocument::parse(SITE_XRDS.as_bytes()).unwrap();
        let servers = doc.services_of_type(TYPE_SERVER);
        let endpoints: Vec<&str> = servers
            .iter()
            .map(|s| s.uris[0].as_str())
            .collect();
        assert_eq!(
            endpoints,
            [
                "https://op.example.com/endpoint",
                "https://op.example.com/backup",
                "https://op.example.com/unranked",
            ]
        );
    }

    #[test]
    fn ties_keep_document_order() {
        let xml = r#"<XRD xmlns="xri://$xrd*($v*2.0)">
  <Service priority="5"><Type>t</Type><URI>first</URI></Service>
  <Service priority="5"><Type>t</Type><URI>second</URI></Service>
</XRD>"#;
        let doc = XrdDocument::parse(xml.as_bytes()).unwrap();
        let services = doc.services_of_type("t");
        assert_eq!(services[0].uris[0], "first");
        assert_eq!(services[1].uris[0], "second");
    }

    #[test]
    fn described_by_entry_carries_template_and_next_authority() {
        let doc = XrdDocument::parse(SITE_XRDS.as_bytes()).unwrap();
        let entry = doc.services_of_type(TYPE_DESCRIBED_BY)[0];
        assert_eq!(
            entry.uri_template.as_deref(),
            Some("https://example.com/user-xrd?uri={%uri}")
        );
        assert_eq!(entry.next_authority.as_deref(), Some("hosting.example.net"));
    }

    #[test]
    fn canonical_id_requires_exactly_one_element() {
        let doc = XrdDocument::parse(SITE_XRDS.as_bytes()).unwrap();
        assert_eq!(doc.canonical_id(), Some("example.com"));

        let none = XrdDocument::parse(
            br#"<XRD xmlns="xri://$xrd*($v*2.0)"></XRD>"#,
        )
        .unwrap();
        assert_eq!(none.canonical_id(), None);

        let two = XrdDocument::parse(
            br#"<XRD xmlns="xri://$xrd*($v*2.0)">
  <CanonicalID>a.example.com</CanonicalID>
  <CanonicalID>b.example.com</CanonicalID>
</XRD>"#,
        )
        .unwrap();
        assert_eq!(two.canonical_id(), None);
    }

    #[test]
    fn last_descriptor_in_the_envelope_is_authoritative() {
        let xml = r#"<xrds:XRDS xmlns:xrds="xri://$xrds" xmlns="xri://$xrd*($v*2.0)">
  <XRD><CanonicalID>stale.example.com</CanonicalID></XRD>
  <XRD><CanonicalID>current.example.com</CanonicalID></XRD>
</xrds:XRDS>"#;
        let doc = XrdDocument::parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.canonical_id(), Some("current.example.com"));
    }

    #[test]
    fn unparsable_priority_is_treated_as_absent() {
        let xml = r#"<XRD xmlns="xri://$xrd*($v*2.0)">
  <Service priority="soon"><Type>t</Type><URI>unranked</URI></Service>
  <Service priority="3"><Type>t</Type><URI>ranked</URI></Service>
</XRD>"#;
        let doc = XrdDocument::parse(xml.as_bytes()).unwrap();
        let services = doc.services_of_type("t");
        assert_eq!(services[0].uris[0], "ranked");
        assert_eq!(services[0].priority, Some(3));
        assert_eq!(services[1].priority, None);
    }

    #[test]
    fn signature_location_is_exposed() {
        let xml = r#"<XRD xmlns="xri://$xrd*($v*2.0)">
  <SignatureLocation>https://example.com/xrd.sig</SignatureLocation>
</XRD>"#;
        let doc = XrdDocument::parse(xml.as_bytes()).unwrap();
        assert_eq!(
            doc.signature_location().unwrap().as_str(),
            "https://example.com/xrd.sig"
        );
    }

    #[test]
    fn documents_with_dtds_are_rejected() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE XRD [<!ENTITY x SYSTEM "file:///etc/passwd">]>
<XRD xmlns="xri://$xrd*($v*2.0)"><CanonicalID>&x;</CanonicalID></XRD>"#;
        assert!(matches!(
            XrdDocument::parse(xml.as_bytes()),
            Err(XrdError::Xml(_))
        ));
    }

    #[test]
    fn raw_bytes_are_preserved_exactly() {
        let doc = XrdDocument::parse(SITE_XRDS.as_bytes()).unwrap();
        assert_eq!(doc.raw(), SITE_XRDS.as_bytes());
    }
}
