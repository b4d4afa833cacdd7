//! Local recognition engine: the `tesseract` CLI.
//!
//! The engine is kept warm across calls: the first extraction verifies the
//! binary and creates a scratch directory, later calls reuse both. `release`
//! drops the session (and its scratch directory); the next call starts a
//! fresh one.

use super::OcrBackend;
use crate::config::ExtractorConfig;
use crate::error::BackendError;
use crate::pipeline::{encode, mime, render};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct Session {
    scratch: TempDir,
}

pub struct TesseractBackend {
    language: String,
    max_pixels: u32,
    session: Mutex<Option<Session>>,
}

impl TesseractBackend {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            language: config.tesseract_language.clone(),
            max_pixels: config.render_max_pixels,
            session: Mutex::new(None),
        }
    }

    /// Scratch directory of the warm session, starting one if needed.
    async fn acquire(&self) -> Result<PathBuf, BackendError> {
        let mut session = self.session.lock().await;
        if let Some(s) = session.as_ref() {
            return Ok(s.scratch.path().to_path_buf());
        }

        let version = Command::new("tesseract")
            .arg("--version")
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    BackendError::fatal("Tesseract not found (install tesseract-ocr)")
                }
                _ => BackendError::fatal(format!("Could not start tesseract: {e}")),
            })?;
        let banner = String::from_utf8_lossy(&version.stdout);
        info!(
            "Started tesseract session ({})",
            banner.lines().next().unwrap_or("unknown version")
        );

        let scratch = TempDir::new()
            .map_err(|e| BackendError::fatal(format!("Could not create scratch directory: {e}")))?;
        let path = scratch.path().to_path_buf();
        *session = Some(Session { scratch });
        Ok(path)
    }

    async fn recognise(&self, dir: &Path, bytes: &[u8], extension: &str) -> Result<String, BackendError> {
        let input = tempfile::Builder::new()
            .prefix("page-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(dir)
            .map_err(|e| BackendError::fatal(format!("Could not create temp file: {e}")))?;
        tokio::fs::write(input.path(), bytes)
            .await
            .map_err(|e| BackendError::fatal(format!("Could not write temp file: {e}")))?;

        let output = Command::new("tesseract")
            .arg(input.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::fatal(format!("Could not run tesseract: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::skip(format!("tesseract failed: {}", stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        mime::is_pdf(mime_type) || mime::is_image(mime_type)
    }

    async fn extract_pages(
        &self,
        data: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<Option<Vec<String>>, BackendError> {
        let dir = self.acquire().await?;

        if !mime::is_pdf(mime_type) {
            let extension = mime::extension(data).unwrap_or("img");
            let text = self.recognise(&dir, data, extension).await?;
            return Ok(Some(vec![text]));
        }

        let images = render::rasterise_pdf(data.to_vec(), self.max_pixels).await?;
        debug!("{filename}: {} pages to recognise", images.len());
        let mut pages = Vec::with_capacity(images.len());
        for image in &images {
            let png = encode::encode_png(image)
                .map_err(|e| BackendError::skip(format!("could not encode page: {e}")))?;
            pages.push(self.recognise(&dir, &png, "png").await?);
        }
        Ok(Some(pages))
    }

    async fn release(&self) {
        if self.session.lock().await.take().is_some() {
            info!("Stopped tesseract session");
        }
    }
}
