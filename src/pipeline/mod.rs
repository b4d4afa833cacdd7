//! Attachment pipeline stages shared by the OCR backends.
//!
//! Each submodule implements exactly one transformation step, so a backend
//! picks the stages it needs:
//!
//! ```text
//! bytes ──▶ mime ──▶ render ──▶ encode ──▶ (backend) ──▶ postprocess
//!          (infer)  (pdfium)   (PNG/b64)                 (cleanup)
//! ```
//!
//! 1. [`mime`]   detects the type from magic bytes
//! 2. [`render`] rasterises PDF pages or reads their text layer; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`] turns images into PNG bytes, base64 and data URLs
//! 4. [`postprocess`] cleans the page text of the backends that need it

pub mod encode;
pub mod mime;
pub mod postprocess;
pub mod render;
