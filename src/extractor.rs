//! Extraction orchestrator.
//!
//! An [`Extractor`] owns the active backend and the shared
//! [`ProcessingStatus`](crate::status::ProcessingStatus). A run walks its
//! documents strictly one after another:
//!
//! ```text
//! for each document
//!   ├─ cancelled? ──▶ stop (on_cancelled)
//!   ├─ read snapshot + reference index
//!   ├─ discover: drop processed refs, dedupe by markup
//!   ├─ OCR in waves of `wave_size`
//!   │     each call: retry with backoff ▸ raced against cancellation
//!   ├─ cancelled? ──▶ discard results, stop
//!   └─ one mutation pass: race guards, callouts in descending offset order
//! on_complete(extracted, skipped)
//! ```
//!
//! A fatal backend error, or any unexpected error, aborts the run at once and
//! is reported through `on_error`. Notes annotated before the failure keep
//! their callouts.

use crate::backend::{create_backend, process, Extraction, OcrBackend, ProcessOptions};
use crate::concurrency::{try_run_in_waves, with_cancellation, Cancellable, CancellationToken};
use crate::config::ExtractorConfig;
use crate::discovery::discover;
use crate::document::{AttachmentRef, DocumentId, DocumentStore};
use crate::error::{BackendError, ErrorKind, ExtractError, SkipReason};
use crate::insertion::{apply_annotations, ExtractionResults, InsertionReport};
use crate::progress::{ExtractionProgressCallback, SkippedReference};
use crate::status::StatusManager;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Documents fully processed (a cancelled or failed document is not counted).
    pub documents: usize,
    /// References that received a callout.
    pub extracted: usize,
    pub skipped: Vec<SkippedReference>,
    pub duration_ms: u64,
}

/// How a run ended. Callbacks have already been invoked when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RunOutcome {
    Completed(RunSummary),
    Cancelled(RunSummary),
    Failed { message: String, summary: RunSummary },
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed(s) | RunOutcome::Cancelled(s) => s,
            RunOutcome::Failed { summary, .. } => summary,
        }
    }
}

struct Active {
    config: Arc<ExtractorConfig>,
    backend: Arc<dyn OcrBackend>,
}

/// Everything a run needs, captured once at its start.
struct RunContext {
    config: Arc<ExtractorConfig>,
    backend: Arc<dyn OcrBackend>,
    options: ProcessOptions,
    token: CancellationToken,
}

impl RunContext {
    fn trace(&self, message: impl FnOnce() -> String) {
        if self.config.debug_logging {
            debug!("{}", message());
        }
    }
}

/// Returns the status to idle however the run future ends, including when
/// the caller drops it.
struct RunGuard<'a> {
    status: &'a StatusManager,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.status.finish();
    }
}

/// Clears the reconfiguration flag when the swap ends or is dropped.
struct ReconfigureGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ReconfigureGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Result of processing one document.
#[derive(Default)]
struct DocumentOutcome {
    extracted: usize,
    skipped: Vec<SkippedReference>,
    cancelled: bool,
}

/// Top-level controller for extraction runs.
pub struct Extractor {
    active: Mutex<Active>,
    status: StatusManager,
    token: Mutex<CancellationToken>,
    /// Set while a backend swap is in progress. Runs refuse to start
    /// meanwhile, but the status stays idle.
    reconfiguring: AtomicBool,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.active();
        f.debug_struct("Extractor")
            .field("backend", &active.backend.name())
            .field("status", &self.status.get())
            .finish()
    }
}

impl Extractor {
    /// Create an extractor with the backend selected by `config.backend`.
    pub fn new(config: ExtractorConfig) -> Self {
        let backend = create_backend(&config);
        Self::with_backend(config, backend)
    }

    /// Create an extractor around a caller-supplied backend.
    pub fn with_backend(config: ExtractorConfig, backend: Arc<dyn OcrBackend>) -> Self {
        Self {
            active: Mutex::new(Active {
                config: Arc::new(config),
                backend,
            }),
            status: StatusManager::new(),
            token: Mutex::new(CancellationToken::new()),
            reconfiguring: AtomicBool::new(false),
        }
    }

    fn active(&self) -> MutexGuard<'_, Active> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn token(&self) -> MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Handle for observers of the processing status.
    pub fn status(&self) -> StatusManager {
        self.status.clone()
    }

    pub fn config(&self) -> Arc<ExtractorConfig> {
        Arc::clone(&self.active().config)
    }

    pub fn backend_name(&self) -> &'static str {
        self.active().backend.name()
    }

    pub fn can_start_single(&self) -> bool {
        self.is_free()
    }

    pub fn can_start_all(&self) -> bool {
        self.is_free()
    }

    fn is_free(&self) -> bool {
        self.status.is_idle() && !self.reconfiguring.load(Ordering::SeqCst)
    }

    /// Extract text for every attachment of one note.
    ///
    /// Returns [`ExtractError::AlreadyRunning`] without invoking any callback
    /// if a run is in progress.
    pub async fn start_single(
        &self,
        store: &dyn DocumentStore,
        doc: &DocumentId,
        progress: &dyn ExtractionProgressCallback,
    ) -> Result<RunOutcome, ExtractError> {
        self.run(store, std::slice::from_ref(doc), progress).await
    }

    /// Extract text for every attachment of every note in `docs`, in order.
    pub async fn start_all(
        &self,
        store: &dyn DocumentStore,
        docs: &[DocumentId],
        progress: &dyn ExtractionProgressCallback,
    ) -> Result<RunOutcome, ExtractError> {
        self.run(store, docs, progress).await
    }

    /// [`Self::start_all`], requesting cancellation each time `interrupt`
    /// resolves, then [`Self::shutdown`] however the run ended.
    ///
    /// An error from `interrupt` abandons the run; it is returned as
    /// [`ExtractError::Interrupt`] once the backend has been released.
    pub async fn start_all_interruptible<F, Fut>(
        &self,
        store: &dyn DocumentStore,
        docs: &[DocumentId],
        progress: &dyn ExtractionProgressCallback,
        mut interrupt: F,
    ) -> Result<RunOutcome, ExtractError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let result = self.drive(store, docs, progress, &mut interrupt).await;
        self.shutdown().await;
        result
    }

    async fn drive<F, Fut>(
        &self,
        store: &dyn DocumentStore,
        docs: &[DocumentId],
        progress: &dyn ExtractionProgressCallback,
        interrupt: &mut F,
    ) -> Result<RunOutcome, ExtractError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let run = self.start_all(store, docs, progress);
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => return result,
                signal = interrupt() => {
                    signal.map_err(ExtractError::Interrupt)?;
                    self.request_cancel();
                }
            }
        }
    }

    /// Ask the current run to stop. Returns false when nothing is running
    /// (or cancellation was already requested).
    pub fn request_cancel(&self) -> bool {
        let token = self.token();
        if self.status.request_cancel() {
            info!("Cancellation requested");
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Swap in a new configuration, releasing the current backend before the
    /// next one is created. Fails if a run or another swap is in progress.
    ///
    /// The status stays idle throughout; runs started meanwhile are rejected
    /// with [`ExtractError::AlreadyRunning`].
    pub async fn reconfigure(&self, config: ExtractorConfig) -> Result<(), ExtractError> {
        {
            let _token = self.token();
            if !self.status.is_idle() || self.reconfiguring.swap(true, Ordering::SeqCst) {
                return Err(ExtractError::AlreadyRunning);
            }
        }
        let _guard = ReconfigureGuard {
            flag: &self.reconfiguring,
        };

        let old = Arc::clone(&self.active().backend);
        old.release().await;

        let backend = create_backend(&config);
        info!("Backend set to {}", backend.name());
        *self.active() = Active {
            config: Arc::new(config),
            backend,
        };
        Ok(())
    }

    /// Release the active backend's resources. Call before the host exits.
    pub async fn shutdown(&self) {
        let backend = Arc::clone(&self.active().backend);
        backend.release().await;
    }

    // ── Run loop ─────────────────────────────────────────────────────────────

    fn begin(&self) -> Result<RunContext, ExtractError> {
        let mut token = self.token();
        if self.reconfiguring.load(Ordering::SeqCst) || !self.status.begin() {
            return Err(ExtractError::AlreadyRunning);
        }
        *token = CancellationToken::new();

        let active = self.active();
        Ok(RunContext {
            options: ProcessOptions::from(active.config.as_ref()),
            config: Arc::clone(&active.config),
            backend: Arc::clone(&active.backend),
            token: token.clone(),
        })
    }

    async fn run(
        &self,
        store: &dyn DocumentStore,
        docs: &[DocumentId],
        progress: &dyn ExtractionProgressCallback,
    ) -> Result<RunOutcome, ExtractError> {
        let ctx = self.begin()?;
        let _guard = RunGuard {
            status: &self.status,
        };
        let started = Instant::now();
        let mut summary = RunSummary::default();

        info!(
            "Extracting text from {} note(s) with {}",
            docs.len(),
            ctx.backend.name()
        );

        let mut cancelled = false;
        for (index, doc) in docs.iter().enumerate() {
            if ctx.token.is_cancelled() {
                cancelled = true;
                break;
            }
            ctx.trace(|| format!("Processing note {doc}"));
            progress.on_progress(index + 1, docs.len());

            match process_document(&ctx, store, doc).await {
                Ok(outcome) if outcome.cancelled => {
                    cancelled = true;
                    break;
                }
                Ok(outcome) => {
                    summary.documents += 1;
                    summary.extracted += outcome.extracted;
                    summary.skipped.extend(outcome.skipped);
                }
                Err(e) => {
                    summary.duration_ms = started.elapsed().as_millis() as u64;
                    let message = e.user_message();
                    if e.is_user_facing() {
                        warn!("Text extraction stopped: {e}");
                    } else {
                        error!("Text extraction failed: {e:?}");
                    }
                    progress.on_error(&message);
                    return Ok(RunOutcome::Failed { message, summary });
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        if cancelled || ctx.token.is_cancelled() {
            info!("Text extraction cancelled");
            progress.on_cancelled();
            return Ok(RunOutcome::Cancelled(summary));
        }

        info!(
            "Text extraction complete: {} extracted, {} skipped",
            summary.extracted,
            summary.skipped.len()
        );
        progress.on_complete(summary.extracted, &summary.skipped);
        Ok(RunOutcome::Completed(summary))
    }
}

async fn process_document(
    ctx: &RunContext,
    store: &dyn DocumentStore,
    doc: &DocumentId,
) -> Result<DocumentOutcome, ExtractError> {
    let snapshot = store.read_snapshot(doc).await?;
    let refs = store.references(doc, &snapshot).await?;
    let found = discover(&snapshot, &refs);
    if found.is_empty() {
        ctx.trace(|| format!("{doc}: nothing to extract"));
        return Ok(DocumentOutcome::default());
    }
    ctx.trace(|| {
        format!(
            "{doc}: {} reference(s), {} distinct attachment(s)",
            found.references.len(),
            found.unique.len()
        )
    });

    let tasks: Vec<_> = found
        .unique
        .iter()
        .map(|r| move || extract_one(ctx, store, doc, r))
        .collect();
    let extracted = try_run_in_waves(tasks, ctx.config.wave_size, &ctx.token).await?;

    if ctx.token.is_cancelled() {
        ctx.trace(|| format!("{doc}: cancelled, discarding results"));
        return Ok(DocumentOutcome {
            cancelled: true,
            ..Default::default()
        });
    }

    let mut results = ExtractionResults::new();
    let mut reasons: HashMap<String, SkipReason> = HashMap::new();
    for (markup, extraction) in extracted {
        match extraction {
            Extraction::Text(text) => {
                results.insert(markup, Some(text));
            }
            Extraction::Skipped(reason) => {
                results.insert(markup.clone(), None);
                reasons.insert(markup, reason);
            }
        }
    }

    let report = if results.values().any(Option::is_some) {
        let title = ctx.config.callout_title.as_str();
        let token = &ctx.token;
        let mut report: Option<InsertionReport> = None;
        store
            .mutate(doc, &mut |current: &str| {
                if token.is_cancelled() {
                    return current.to_string();
                }
                let r = apply_annotations(current, &snapshot, &found.references, &results, title);
                let content = r.content.clone();
                report = Some(r);
                content
            })
            .await?;
        match report {
            Some(r) => r,
            None => {
                return Ok(DocumentOutcome {
                    cancelled: true,
                    ..Default::default()
                })
            }
        }
    } else {
        InsertionReport::default()
    };

    if report.document_changed {
        warn!("Note {doc} changed during processing, skipping");
    }

    let mut outcome = DocumentOutcome::default();
    for (i, r) in found.references.iter().enumerate() {
        if report.inserted.contains(&i) {
            outcome.extracted += 1;
            continue;
        }
        let reason = if report.document_changed {
            SkipReason::DocumentChanged
        } else if report.moved.contains(&i) {
            SkipReason::Moved
        } else {
            reasons.get(&r.original).cloned().unwrap_or(SkipReason::NoText)
        };
        outcome.skipped.push(SkippedReference {
            document: doc.path().to_path_buf(),
            markup: r.original.clone(),
            reason,
        });
    }
    ctx.trace(|| {
        format!(
            "{doc}: {} callout(s) inserted, {} skipped",
            outcome.extracted,
            outcome.skipped.len()
        )
    });
    Ok(outcome)
}

/// Resolve, read and OCR one distinct attachment.
async fn extract_one(
    ctx: &RunContext,
    store: &dyn DocumentStore,
    doc: &DocumentId,
    r: &AttachmentRef,
) -> Result<(String, Extraction), ExtractError> {
    let markup = r.original.clone();

    let Some(file) = store.resolve_reference(&r.link, doc).await else {
        let reason = SkipReason::FileNotFound;
        warn!("Skipping {}: {reason}", r.link);
        return Ok((markup, Extraction::Skipped(reason)));
    };
    let data = store.read_binary(&file).await?;
    ctx.trace(|| format!("{doc}: extracting {} ({} bytes)", file.name, data.len()));

    let call = process(ctx.backend.as_ref(), &data, &file.name, &ctx.options);
    let extraction = match with_cancellation(call, &ctx.token, ctx.config.cancel_poll_interval).await {
        Cancellable::Canceled => Extraction::Skipped(SkipReason::Canceled),
        Cancellable::Completed(Ok(extraction)) => extraction,
        Cancellable::Completed(Err(e)) => return Err(escalate(e, ctx.options.max_retries)),
    };
    Ok((markup, extraction))
}

/// A backend error that reached the orchestrator ends the run.
fn escalate(e: BackendError, max_retries: u32) -> ExtractError {
    match e.kind {
        ErrorKind::Retryable => ExtractError::RetriesExhausted {
            attempts: max_retries + 1,
            last: e,
        },
        ErrorKind::Skip | ErrorKind::Fatal => ExtractError::Backend(BackendError {
            kind: ErrorKind::Fatal,
            ..e
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_of_backend_errors() {
        let e = escalate(BackendError::http(503, "HTTP 503"), 3);
        assert!(matches!(e, ExtractError::RetriesExhausted { attempts: 4, .. }));
        assert!(!e.is_user_facing());

        let e = escalate(BackendError::fatal("Custom command timed out"), 3);
        assert!(e.is_user_facing());
        assert_eq!(e.user_message(), "Custom command timed out");
    }

    #[test]
    fn outcome_serialises_with_tag() {
        let outcome = RunOutcome::Completed(RunSummary {
            documents: 1,
            extracted: 2,
            ..Default::default()
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["extracted"], 2);
    }

    #[test]
    fn new_extractor_is_idle() {
        let x = Extractor::new(ExtractorConfig::default());
        assert!(x.can_start_single());
        assert!(x.can_start_all());
        assert!(!x.request_cancel());
        assert_eq!(x.backend_name(), "tesseract");
    }

    #[tokio::test]
    async fn reconfigure_swaps_backend() {
        let x = Extractor::new(ExtractorConfig::default());
        let config = ExtractorConfig::builder()
            .backend(crate::config::BackendKind::Command)
            .custom_command("cat {input} > {output}")
            .build()
            .unwrap();
        x.reconfigure(config).await.unwrap();
        assert_eq!(x.backend_name(), "command");
        assert!(x.can_start_all());
    }
}
