//! Attachment discovery: which references of a snapshot still need text.

use crate::callout::is_managed_callout;
use crate::document::AttachmentRef;
use std::collections::HashSet;

/// References of one snapshot that are eligible for extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Every eligible occurrence, in document order. Each one is a candidate
    /// for insertion.
    pub references: Vec<AttachmentRef>,
    /// First occurrence of each distinct markup: one OCR call each.
    pub unique: Vec<AttachmentRef>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

/// Whether the snapshot already has a managed callout right after `r`.
///
/// Whitespace and quote characters between the embed and the marker are
/// ignored, so callouts nested in blockquotes are recognised too.
pub fn already_processed(snapshot: &str, r: &AttachmentRef) -> bool {
    snapshot
        .get(r.end..)
        .is_some_and(is_managed_callout)
}

/// Filter out processed references and deduplicate the rest by markup.
pub fn discover(snapshot: &str, refs: &[AttachmentRef]) -> Discovery {
    let references: Vec<AttachmentRef> = refs
        .iter()
        .filter(|r| !already_processed(snapshot, r))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let unique = references
        .iter()
        .filter(|r| seen.insert(r.original.as_str()))
        .cloned()
        .collect();

    Discovery { references, unique }
}
