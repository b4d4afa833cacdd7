//! Callout markers.
//!
//! Every block this crate writes starts with [`CALLOUT_MARKER`]. The marker
//! is how a later run recognises an embed it already handled, so it must
//! never change. Notes written before the marker existed carry
//! [`LEGACY_CALLOUT_HEADER`] instead; it is recognised the same way and
//! rewritten to the current form whenever a note is annotated.

use std::borrow::Cow;

/// Marker for callouts managed by this crate (collapsed by default).
pub const CALLOUT_MARKER: &str = "[!ocr-extractor]-";

/// Header written before the dedicated callout type existed.
pub const LEGACY_CALLOUT_HEADER: &str = "[!summary]- Extracted text";

/// First line of a callout body, without the quote prefix.
pub fn header(title: &str) -> String {
    format!("{CALLOUT_MARKER} {title}")
}

/// Whether `text` starts with a managed callout, ignoring leading
/// whitespace and quote characters.
pub fn is_managed_callout(text: &str) -> bool {
    let rest = text.trim_start_matches(|c: char| c.is_whitespace() || c == '>');
    rest.starts_with(CALLOUT_MARKER) || rest.starts_with(LEGACY_CALLOUT_HEADER)
}

/// Rewrite every legacy header in `content` to the current marker.
pub fn migrate_legacy_callouts<'a>(content: &'a str, title: &str) -> Cow<'a, str> {
    if content.contains(LEGACY_CALLOUT_HEADER) {
        Cow::Owned(content.replace(LEGACY_CALLOUT_HEADER, &header(title)))
    } else {
        Cow::Borrowed(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_current_and_legacy_markers() {
        assert!(is_managed_callout("\n\n> [!ocr-extractor]- Extracted text\n> hi"));
        assert!(is_managed_callout("\n> > [!ocr-extractor]- Custom"));
        assert!(is_managed_callout("\n\n> [!summary]- Extracted text\n> hi"));
        assert!(!is_managed_callout("\n\n> [!note] Something else"));
        assert!(!is_managed_callout("\n\nplain text"));
        assert!(!is_managed_callout(""));
    }

    #[test]
    fn migrates_legacy_header() {
        let content = "![[a.pdf]]\n\n> [!summary]- Extracted text\n> hello\n";
        let migrated = migrate_legacy_callouts(content, "Extracted text");
        assert_eq!(
            migrated,
            "![[a.pdf]]\n\n> [!ocr-extractor]- Extracted text\n> hello\n"
        );
    }

    #[test]
    fn migration_without_legacy_borrows() {
        let content = "nothing to see";
        assert!(matches!(
            migrate_legacy_callouts(content, "Extracted text"),
            Cow::Borrowed(_)
        ));
    }
}
