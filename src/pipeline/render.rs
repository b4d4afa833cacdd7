//! PDF access via pdfium: rasterise pages, read the embedded text layer.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! Both entry points move the work onto Tokio's blocking pool so the task
//! driving the OCR wave keeps polling its other calls.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly. `max_pixels` caps the longest edge regardless of
//! physical size, which keeps memory bounded and is what every backend
//! (local engine, vision model, external command) handles best.

use crate::error::BackendError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

/// Rasterise every page of a PDF held in memory.
pub async fn rasterise_pdf(bytes: Vec<u8>, max_pixels: u32) -> Result<Vec<DynamicImage>, BackendError> {
    tokio::task::spawn_blocking(move || rasterise_blocking(bytes, max_pixels))
        .await
        .map_err(|e| BackendError::fatal(format!("Render task panicked: {e}")))?
}

/// Text layer of every page, in page order. Scanned PDFs yield empty pages.
pub async fn text_layer(bytes: Vec<u8>) -> Result<Vec<String>, BackendError> {
    tokio::task::spawn_blocking(move || text_layer_blocking(bytes))
        .await
        .map_err(|e| BackendError::fatal(format!("Text extraction task panicked: {e}")))?
}

fn bind() -> Result<Pdfium, BackendError> {
    pdfium_auto::bind_pdfium_silent()
        .map_err(|e| BackendError::fatal(format!("PDF engine unavailable: {e}")))
}

fn rasterise_blocking(bytes: Vec<u8>, max_pixels: u32) -> Result<Vec<DynamicImage>, BackendError> {
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_byte_vec(bytes, None)
        .map_err(|e| BackendError::skip(format!("could not open PDF ({e:?})")))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            BackendError::skip(format!("could not render page {} ({e:?})", idx + 1))
        })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

fn text_layer_blocking(bytes: Vec<u8>) -> Result<Vec<String>, BackendError> {
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_byte_vec(bytes, None)
        .map_err(|e| BackendError::skip(format!("could not open PDF ({e:?})")))?;

    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let text = page
            .text()
            .map(|t| t.all())
            .map_err(|e| BackendError::skip(format!("could not read text of page {} ({e:?})", idx + 1)))?;
        pages.push(text);
    }
    Ok(pages)
}
