//! The document-model collaborator.
//!
//! The orchestrator never touches files directly. It reads snapshots,
//! reference indexes and attachment bytes through a [`DocumentStore`], and
//! writes through [`DocumentStore::mutate`], which hands the mutator the
//! *current* content. That content may differ from the snapshot the
//! references were computed against, which is why insertion carries race
//! guards (see [`crate::insertion::apply_annotations`]).
//!
//! [`crate::vault::FsVault`] is the filesystem implementation.

use crate::error::ExtractError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of a note: its path relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocumentId(PathBuf);

impl DocumentId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One embedded-file reference inside a snapshot.
///
/// `start..end` is a byte span into the snapshot the reference was parsed
/// from, and `&snapshot[start..end] == original`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AttachmentRef {
    /// Literal markup, e.g. `![[scan.pdf]]`.
    pub original: String,
    /// Link target, e.g. `scan.pdf` or `attachments/scan.pdf`.
    pub link: String,
    pub start: usize,
    pub end: usize,
}

impl AttachmentRef {
    pub fn new(original: impl Into<String>, link: impl Into<String>, start: usize) -> Self {
        let original = original.into();
        let end = start + original.len();
        Self {
            original,
            link: link.into(),
            start,
            end,
        }
    }
}

/// A resolved attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub path: PathBuf,
    /// Display name used in log messages and passed to the backend.
    pub name: String,
}

/// Minimal document model consumed by the [`crate::extractor::Extractor`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full current content of `doc`.
    async fn read_snapshot(&self, doc: &DocumentId) -> Result<String, ExtractError>;

    /// Embedded-file references of `doc`, in document order.
    ///
    /// `snapshot` is the content just returned by [`Self::read_snapshot`];
    /// every span must index into it, even if the note changed since.
    async fn references(
        &self,
        doc: &DocumentId,
        snapshot: &str,
    ) -> Result<Vec<AttachmentRef>, ExtractError>;

    /// Resolve a link target relative to `doc`. `None` if nothing matches.
    async fn resolve_reference(&self, link: &str, doc: &DocumentId) -> Option<AttachmentFile>;

    async fn read_binary(&self, file: &AttachmentFile) -> Result<Vec<u8>, ExtractError>;

    /// Replace the content of `doc` with `f(current)`, where `current` is
    /// read at call time. Returning the input unchanged must not write.
    async fn mutate(
        &self,
        doc: &DocumentId,
        f: &mut (dyn for<'s> FnMut(&'s str) -> String + Send),
    ) -> Result<(), ExtractError>;
}
