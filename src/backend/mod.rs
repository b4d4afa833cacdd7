//! OCR backends.
//!
//! Every backend implements [`OcrBackend`]: a MIME predicate, a per-page
//! extraction call and a `release` hook. The shared contract around them
//! (type gating, embedded PDF text, retries, trimming and joining pages) lives
//! in [`process`], so a backend only has to turn bytes into pages and tag its
//! errors with an [`ErrorKind`](crate::error::ErrorKind).
//!
//! | Variant | Module | Handles |
//! |---------|--------|---------|
//! | Local engine | [`tesseract`] | PDF, images |
//! | Cloud API | [`mistral`] | everything but XML |
//! | Vision LLM | [`vision`] | PDF, images |
//! | External process | [`command`] | anything the command accepts |
//!
//! The orchestrator only sees `Arc<dyn OcrBackend>`, built by
//! [`create_backend`] from the configured [`BackendKind`].

pub mod command;
pub mod mistral;
pub mod tesseract;
pub mod vision;

use crate::concurrency::with_retries;
use crate::config::{BackendKind, ExtractorConfig};
use crate::error::{BackendError, ErrorKind, SkipReason};
use crate::pipeline::{mime, render};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use command::CommandBackend;
pub use mistral::MistralBackend;
pub use tesseract::TesseractBackend;
pub use vision::VisionBackend;

/// Separator between pages of one attachment.
pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Capability interface implemented by every backend variant.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Whether this backend can process `mime`. Unsupported files are
    /// skipped, never failed.
    fn is_type_supported(&self, mime: &str) -> bool;

    /// Recognise text, one entry per page. `Ok(None)` means there is nothing
    /// to extract.
    ///
    /// Errors must carry the right [`ErrorKind`]: `Retryable` errors are
    /// retried by [`process`], `Skip` errors skip this file, `Fatal` errors
    /// abort the run.
    async fn extract_pages(
        &self,
        data: &[u8],
        mime: &str,
        filename: &str,
    ) -> Result<Option<Vec<String>>, BackendError>;

    /// Drop any long-lived resource (warm engine session, cached client).
    ///
    /// Called before the backend is replaced and on shutdown. The backend
    /// must remain usable afterwards; it re-acquires lazily.
    async fn release(&self) {}
}

/// Outcome of [`process`] for one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Skipped(SkipReason),
}

/// Settings of the backend contract that are not backend specific.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub use_embedded_pdf_text: bool,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl From<&ExtractorConfig> for ProcessOptions {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            use_embedded_pdf_text: config.use_embedded_pdf_text,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        }
    }
}

/// Run `backend` on one attachment.
///
/// 1. Sniff the MIME type; skip unknown or unsupported types.
/// 2. For PDFs with `use_embedded_pdf_text`, use the text layer if it has
///    any text.
/// 3. Otherwise call [`OcrBackend::extract_pages`], retrying retryable errors
///    with exponential backoff.
/// 4. Clean each page, drop empty ones and join with [`PAGE_SEPARATOR`].
///
/// Skip-kind errors become [`Extraction::Skipped`]. Fatal errors, and
/// retryable errors that outlive the retries, are returned.
pub async fn process(
    backend: &dyn OcrBackend,
    data: &[u8],
    filename: &str,
    options: &ProcessOptions,
) -> Result<Extraction, BackendError> {
    let mime_type = match mime::sniff(data) {
        Some(m) if backend.is_type_supported(m) => m,
        other => {
            let reason = SkipReason::UnsupportedType(other.unwrap_or("unknown").to_string());
            warn!("Skipping {filename}: {reason}");
            return Ok(Extraction::Skipped(reason));
        }
    };

    if mime::is_pdf(mime_type) && options.use_embedded_pdf_text {
        match render::text_layer(data.to_vec()).await {
            Ok(pages) => {
                let text = join_pages(&pages);
                if !text.is_empty() {
                    debug!("{filename}: using embedded PDF text");
                    return Ok(Extraction::Text(text));
                }
            }
            Err(e) if e.kind == ErrorKind::Fatal => return Err(e),
            Err(e) => debug!("{filename}: no usable text layer ({e})"),
        }
    }

    let pages = with_retries(
        || backend.extract_pages(data, mime_type, filename),
        BackendError::is_retryable,
        options.max_retries,
        options.retry_base_delay,
    )
    .await;

    let pages = match pages {
        Ok(Some(pages)) => pages,
        Ok(None) => return Ok(Extraction::Skipped(no_text(filename))),
        Err(e) if e.kind == ErrorKind::Skip => {
            warn!("Skipping {filename}: {e}");
            return Ok(Extraction::Skipped(SkipReason::NoText));
        }
        Err(e) => return Err(e),
    };

    let text = join_pages(&pages);
    if text.is_empty() {
        return Ok(Extraction::Skipped(no_text(filename)));
    }
    Ok(Extraction::Text(text))
}

fn no_text(filename: &str) -> SkipReason {
    let reason = SkipReason::NoText;
    warn!("Skipping {filename}: {reason}");
    reason
}

/// Trim every page, drop the empty ones and join the rest.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Build the backend selected by `config.backend`.
///
/// Construction never touches the network or spawns processes; credentials
/// and binaries are checked on first use so that problems surface as
/// user-facing run errors.
pub fn create_backend(config: &ExtractorConfig) -> Arc<dyn OcrBackend> {
    match config.backend {
        BackendKind::Tesseract => Arc::new(TesseractBackend::new(config)),
        BackendKind::Mistral => Arc::new(MistralBackend::new(config)),
        BackendKind::Vision => Arc::new(VisionBackend::new(config)),
        BackendKind::Command => Arc::new(CommandBackend::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::blank_png;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        fail_first: usize,
        error: BackendError,
        pages: Option<Vec<String>>,
    }

    impl Scripted {
        fn ok(pages: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                error: BackendError::retryable("unused"),
                pages: Some(pages.iter().map(|p| p.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl OcrBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_type_supported(&self, mime: &str) -> bool {
            mime::is_image(mime)
        }

        async fn extract_pages(
            &self,
            _data: &[u8],
            _mime: &str,
            _filename: &str,
        ) -> Result<Option<Vec<String>>, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(self.error.clone());
            }
            Ok(self.pages.clone())
        }
    }

    fn options() -> ProcessOptions {
        ProcessOptions {
            use_embedded_pdf_text: false,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn joins_non_empty_pages() {
        let pages = ["  first page \n", "", "   \n ", "second page"];
        assert_eq!(join_pages(&pages), "first page\n\n---\n\nsecond page");
        assert_eq!(join_pages::<&str>(&[]), "");
    }

    #[test]
    fn join_keeps_page_content_verbatim() {
        let pages = ["```\nfn main() {}\n```", "a\r\n\r\n\r\n\r\nb ![x](x.png)"];
        assert_eq!(
            join_pages(&pages),
            "```\nfn main() {}\n```\n\n---\n\na\r\n\r\n\r\n\r\nb ![x](x.png)"
        );
    }

    #[tokio::test]
    async fn unsupported_type_is_skipped_without_call() {
        let backend = Scripted::ok(&["text"]);
        let out = process(&backend, b"%PDF-1.4\n", "a.pdf", &options()).await.unwrap();
        assert_eq!(
            out,
            Extraction::Skipped(SkipReason::UnsupportedType("application/pdf".into()))
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        let out = process(&backend, b"plain", "a.txt", &options()).await.unwrap();
        assert_eq!(
            out,
            Extraction::Skipped(SkipReason::UnsupportedType("unknown".into()))
        );
    }

    #[tokio::test]
    async fn returns_joined_text() {
        let backend = Scripted::ok(&["one", "two"]);
        let png = blank_png().unwrap();
        let out = process(&backend, &png, "scan.png", &options()).await.unwrap();
        assert_eq!(out, Extraction::Text("one\n\n---\n\ntwo".into()));
    }

    #[tokio::test]
    async fn empty_pages_mean_no_text() {
        let backend = Scripted::ok(&["", "  "]);
        let png = blank_png().unwrap();
        let out = process(&backend, &png, "blank.png", &options()).await.unwrap();
        assert_eq!(out, Extraction::Skipped(SkipReason::NoText));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried() {
        let backend = Scripted {
            fail_first: 2,
            error: BackendError::http(503, "HTTP 503"),
            ..Scripted::ok(&["recovered"])
        };
        let png = blank_png().unwrap();
        let out = process(&backend, &png, "scan.png", &options()).await.unwrap();
        assert_eq!(out, Extraction::Text("recovered".into()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn skip_error_becomes_skip() {
        let backend = Scripted {
            fail_first: usize::MAX,
            error: BackendError::skip("file type not supported").with_status(422),
            ..Scripted::ok(&[])
        };
        let png = blank_png().unwrap();
        let out = process(&backend, &png, "scan.png", &options()).await.unwrap();
        assert_eq!(out, Extraction::Skipped(SkipReason::NoText));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_error_propagates_without_retry() {
        let backend = Scripted {
            fail_first: usize::MAX,
            error: BackendError::fatal("Unauthorized, check your API key").with_status(401),
            ..Scripted::ok(&[])
        };
        let png = blank_png().unwrap();
        let err = process(&backend, &png, "scan.png", &options()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Fatal);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_builds_each_variant() {
        for kind in [
            BackendKind::Tesseract,
            BackendKind::Mistral,
            BackendKind::Vision,
            BackendKind::Command,
        ] {
            let config = ExtractorConfig::builder().backend(kind).build().unwrap();
            let backend = create_backend(&config);
            assert_eq!(backend.name(), kind.as_str());
        }
    }
}
