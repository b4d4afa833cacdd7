//! MIME detection from magic bytes.
//!
//! File extensions in a vault are unreliable (a `.pdf` exported as an image,
//! screenshots saved without extension), so the type is read from the
//! content itself.

pub const PDF: &str = "application/pdf";

/// Sniff the MIME type of `bytes`. `None` when the format is unknown.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.mime_type())
}

pub fn is_pdf(mime: &str) -> bool {
    mime == PDF
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// File extension for a MIME type, used to name temp files.
pub fn extension(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.extension())
}
