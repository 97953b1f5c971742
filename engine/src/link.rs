//! Alignment link types.
//!
//! A link associates one or more source-text token references with one or
//! more target-text token references. Links are the unit of storage,
//! indexing, and journaling.

use crate::reference::sanitize;
use crate::LinkId;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Which member set of a link an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

/// How a link came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkOrigin {
    /// Created by a user in the editor
    #[default]
    Manual,
    /// Produced by an automatic aligner
    Machine,
}

/// Review status of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkStatus {
    #[default]
    Created,
    Approved,
    NeedsReview,
    Rejected,
}

/// Metadata attached to a link.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMetadata {
    pub origin: LinkOrigin,
    pub status: LinkStatus,
    /// Free-text notes, in the order they were added
    pub notes: Vec<String>,
}

/// A record associating source-text tokens with target-text tokens.
///
/// Member reference strings are stored as given but are sanitized (side
/// marker stripped) before being used as index keys. A link may transiently
/// have an empty side while being edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentLink {
    /// Unique within a project; empty until assigned
    #[serde(default)]
    pub id: LinkId,
    /// Source-side reference strings, in token order
    pub sources: Vec<String>,
    /// Target-side reference strings, in token order
    pub targets: Vec<String>,
    #[serde(default)]
    pub metadata: LinkMetadata,
}

impl AlignmentLink {
    /// Create a link with default metadata.
    pub fn new(
        id: impl Into<LinkId>,
        sources: Vec<String>,
        targets: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sources,
            targets,
            metadata: LinkMetadata::default(),
        }
    }

    /// The member references on one side.
    pub fn members(&self, side: Side) -> &[String] {
        match side {
            Side::Source => &self.sources,
            Side::Target => &self.targets,
        }
    }

    /// Sanitized member references on one side, ready for index keying.
    pub fn sanitized_members(&self, side: Side) -> impl Iterator<Item = &str> {
        self.members(side).iter().map(|m| sanitize(m))
    }

    /// Whether the link has at least one member on the given side.
    pub fn has_members(&self, side: Side) -> bool {
        !self.members(side).is_empty()
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.targets.is_empty()
    }

    /// Content-derived id.
    ///
    /// Hashes the sorted, sanitized members of both sides, so re-importing
    /// the same alignment data yields the same ids and bulk loads stay
    /// idempotent.
    pub fn derived_id(&self) -> LinkId {
        let mut sources: Vec<&str> = self.sanitized_members(Side::Source).collect();
        let mut targets: Vec<&str> = self.sanitized_members(Side::Target).collect();
        sources.sort_unstable();
        targets.sort_unstable();

        let mut hasher = DefaultHasher::new();
        sources.hash(&mut hasher);
        targets.hash(&mut hasher);
        format!("L{:016x}", hasher.finish())
    }

    /// The id to persist under: the explicit id, or the derived one.
    pub fn effective_id(&self) -> LinkId {
        if self.id.is_empty() {
            self.derived_id()
        } else {
            self.id.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_link() -> AlignmentLink {
        AlignmentLink::new(
            "link-1",
            vec!["010010010011".into()],
            vec!["o010010010021".into()],
        )
    }

    #[test]
    fn members_by_side() {
        let link = sample_link();
        assert_eq!(link.members(Side::Source), ["010010010011"]);
        assert_eq!(link.members(Side::Target), ["o010010010021"]);
    }

    #[test]
    fn sanitized_members_strip_markers() {
        let link = sample_link();
        let targets: Vec<&str> = link.sanitized_members(Side::Target).collect();
        assert_eq!(targets, ["010010010021"]);
    }

    #[test]
    fn has_members() {
        let link = sample_link();
        assert!(link.has_members(Side::Source));

        let empty = AlignmentLink::new("x", vec![], vec!["01".into()]);
        assert!(!empty.has_members(Side::Source));
        assert!(empty.has_members(Side::Target));
        assert!(!empty.is_empty());
    }

    #[test]
    fn derived_id_is_stable() {
        let a = sample_link();
        let b = sample_link();
        assert_eq!(a.derived_id(), b.derived_id());
    }

    #[test]
    fn derived_id_ignores_member_order_and_markers() {
        let a = AlignmentLink::new("", vec!["01".into(), "02".into()], vec!["03".into()]);
        let b = AlignmentLink::new("", vec!["02".into(), "o01".into()], vec!["03".into()]);
        assert_eq!(a.derived_id(), b.derived_id());
    }

    #[test]
    fn derived_id_differs_for_different_content() {
        let a = AlignmentLink::new("", vec!["01".into()], vec!["02".into()]);
        let b = AlignmentLink::new("", vec!["01".into()], vec!["03".into()]);
        assert_ne!(a.derived_id(), b.derived_id());
    }

    #[test]
    fn effective_id() {
        let named = sample_link();
        assert_eq!(named.effective_id(), "link-1");

        let anonymous = AlignmentLink::new("", vec!["01".into()], vec!["02".into()]);
        assert_eq!(anonymous.effective_id(), anonymous.derived_id());
    }

    #[test]
    fn serialization_uses_camel_case() {
        let mut link = sample_link();
        link.metadata.status = LinkStatus::NeedsReview;

        let json = serde_json::to_string(&link).unwrap();
        assert!(json.contains("\"needsReview\""));
        assert!(json.contains("\"manual\""));

        let parsed: AlignmentLink = serde_json::from_str(&json).unwrap();
        assert_eq!(link, parsed);
    }

    #[test]
    fn deserialization_defaults_id_and_metadata() {
        let json = r#"{"sources":["01"],"targets":["02"]}"#;
        let link: AlignmentLink = serde_json::from_str(json).unwrap();
        assert!(link.id.is_empty());
        assert_eq!(link.metadata.status, LinkStatus::Created);
    }
}
