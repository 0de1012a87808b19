//! Relation-priority selection: pick the candidate link whose relation-type
//! combination best matches a preference ordering.

use crate::hostmeta::{Link, RelationTypeSet};

/// MIME type of XRD documents referenced from host metadata.
pub const XRDS_MIME: &str = "application/xrds+xml";

/// Relation-type URIs used by the discovery preference tiers.
pub mod rel {
    /// IANA `describedby` relation.
    pub const DESCRIBED_BY: &str = "http://www.iana.org/assignments/relation/describedby";

    /// Provider (OP) XRD pointer.
    pub const OP_XRD: &str = "http://specs.openid.net/auth/2.5/xrd-op";

    /// Generic XRD pointer.
    pub const XRD: &str = "http://specs.openid.net/auth/2.5/xrd";

    /// User (signon) XRD pointer.
    pub const SIGNON_XRD: &str = "http://specs.openid.net/auth/2.5/xrd-signon";
}

fn tier(relations: &[&str]) -> RelationTypeSet {
    // Tier constants are known-valid URIs.
    RelationTypeSet::from_tokens(relations.iter().copied())
        .unwrap_or_else(|_| RelationTypeSet::new())
}

/// Preference tiers for locating a site-level (provider) XRD pointer,
/// most specific first.
pub fn site_tiers() -> Vec<RelationTypeSet> {
    vec![
        tier(&[rel::DESCRIBED_BY, rel::OP_XRD]),
        tier(&[rel::DESCRIBED_BY, rel::XRD]),
        tier(&[rel::DESCRIBED_BY]),
    ]
}

/// Preference tiers for locating a user-level XRD pointer, most specific
/// first.
pub fn user_tiers() -> Vec<RelationTypeSet> {
    vec![
        tier(&[rel::DESCRIBED_BY, rel::SIGNON_XRD]),
        tier(&[rel::DESCRIBED_BY, rel::XRD]),
        tier(&[rel::DESCRIBED_BY]),
    ]
}

/// Select the best candidate for a required MIME type and tier preference.
///
/// Candidates whose MIME type does not match are discarded. The rest are
/// stable-sorted by the lowest-indexed tier their relation set is a superset
/// of; a candidate satisfying no tier sorts last. The head of the sorted
/// list is returned only if it actually satisfies some tier; a non-matching
/// first element is never returned merely because it sorted first among
/// non-matches.
pub fn select<'a>(
    candidates: &'a [Link],
    mime_type: &str,
    tiers: &[RelationTypeSet],
) -> Option<&'a Link> {
    let rank = |link: &Link| {
        tiers
            .iter()
            .position(|tier| link.relations.is_superset_of(tier))
            .unwrap_or(tiers.len())
    };

    let mut matching: Vec<&Link> = candidates
        .iter()
        .filter(|link| link.mime_type.as_deref() == Some(mime_type))
        .collect();
    matching.sort_by_key(|link| rank(link));

    matching
        .first()
        .filter(|link| rank(link) < tiers.len())
        .copied()
}
