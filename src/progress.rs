//! Progress-callback trait for extraction-run events.
//!
//! Pass a `&dyn ExtractionProgressCallback` to
//! [`crate::extractor::Extractor::start_single`] or
//! [`crate::extractor::Extractor::start_all`] to receive events as the run
//! moves through documents. A shared [`ProgressCallback`] is passed with
//! `as_ref()`.
//!
//! # Why callbacks instead of channels?
//!
//! The host decides how to present progress: a terminal progress bar, a
//! status line, a notification. The library only reports. Exactly one of
//! `on_complete`, `on_cancelled` or `on_error` is called per run.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocr_notes::{ExtractionProgressCallback, SkippedReference};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Printer {
//!     done: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for Printer {
//!     fn on_progress(&self, current: usize, total: usize) {
//!         self.done.store(current, Ordering::SeqCst);
//!         eprintln!("{current}/{total}");
//!     }
//!
//!     fn on_complete(&self, extracted: usize, skipped: &[SkippedReference]) {
//!         eprintln!("{extracted} extracted, {} skipped", skipped.len());
//!     }
//! }
//! ```

use crate::error::SkipReason;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// A reference that did not receive a callout, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedReference {
    /// Note the reference lives in.
    pub document: PathBuf,
    /// Literal embed markup, e.g. `![[scan.pdf]]`.
    pub markup: String,
    pub reason: SkipReason,
}

/// Called by the [`crate::extractor::Extractor`] during a run.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called before each document is processed.
    ///
    /// # Arguments
    /// * `current` - 1-indexed position of the document in the run
    /// * `total`   - number of documents in the run
    fn on_progress(&self, current: usize, total: usize) {
        let _ = (current, total);
    }

    /// Called once when every document was processed.
    ///
    /// # Arguments
    /// * `extracted` - references that received a callout
    /// * `skipped`   - references that did not, with the reason
    fn on_complete(&self, extracted: usize, skipped: &[SkippedReference]) {
        let _ = (extracted, skipped);
    }

    /// Called once when the run stopped because cancellation was requested.
    fn on_cancelled(&self) {}

    /// Called once when the run aborted.
    ///
    /// `message` is safe to display: backend messages for user-facing
    /// errors, a generic message otherwise.
    fn on_error(&self, message: &str) {
        let _ = message;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias for a shared callback.
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
