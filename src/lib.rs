//! # edgequake-ocr-notes
//!
//! Extract text from the scans, PDFs and images embedded in Markdown notes,
//! and write it back under each embed as a collapsed callout.
//!
//! ## Why this crate?
//!
//! Running OCR is the easy part; backends are interchangeable. The hard part
//! is putting the text back into a note that a person may be editing at the
//! same time, without corrupting it, duplicating callouts, or landing text
//! under the wrong embed. This crate owns that part:
//!
//! - bounded, retried, cancellable OCR calls ([`concurrency`])
//! - offset-safe insertion that respects blockquotes and nested callouts
//!   ([`insertion`])
//! - idempotence: an embed followed by a managed callout is never processed
//!   twice ([`discovery`], [`callout`])
//! - optimistic concurrency: a note that changed during OCR is left untouched
//!
//! ## Run Overview
//!
//! ```text
//! note
//!  │
//!  ├─ 1. Discover  parse embeds, drop processed ones, dedupe by markup
//!  ├─ 2. Resolve   link target → attachment file
//!  ├─ 3. OCR       waves of ≤ 5 calls, retry with backoff, cancellable
//!  │                 tesseract │ Mistral OCR │ vision LLM │ shell command
//!  ├─ 4. Polish    per-page cleanup, pages joined with `---`
//!  └─ 5. Insert    race-guarded, last embed first, blank-line isolated
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocr_notes::{BackendKind, Extractor, ExtractorConfig, FsVault, NoopProgressCallback};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let vault = FsVault::open("./notes")?;
//!     let config = ExtractorConfig::builder()
//!         .backend(BackendKind::Mistral)
//!         .mistral_api_key(std::env::var("MISTRAL_API_KEY")?)
//!         .build()?;
//!
//!     let extractor = Extractor::new(config);
//!     let outcome = extractor
//!         .start_all(&vault, &vault.notes(), &NoopProgressCallback)
//!         .await?;
//!     eprintln!("{} callouts written", outcome.summary().extracted);
//!     extractor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrnotes` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-ocr-notes = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod callout;
pub mod concurrency;
pub mod config;
pub mod discovery;
pub mod document;
pub mod error;
pub mod extractor;
pub mod insertion;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod status;
pub mod vault;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{create_backend, Extraction, OcrBackend, PAGE_SEPARATOR};
pub use callout::{CALLOUT_MARKER, LEGACY_CALLOUT_HEADER};
pub use concurrency::{Cancellable, CancellationToken};
pub use config::{BackendKind, ExtractorConfig, ExtractorConfigBuilder};
pub use document::{AttachmentFile, AttachmentRef, DocumentId, DocumentStore};
pub use error::{BackendError, ErrorKind, ExtractError, SkipReason};
pub use extractor::{Extractor, RunOutcome, RunSummary};
pub use insertion::{format_callout, insert_with_blank_lines};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, SkippedReference};
pub use status::{ProcessingStatus, StatusManager};
pub use vault::FsVault;
