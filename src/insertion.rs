//! Offset-safe, idempotent insertion of extracted text.
//!
//! Extracted text goes into a collapsed callout placed right after the embed
//! it came from:
//!
//! ```text
//! ![[scan.pdf]]
//!
//! > [!ocr-extractor]- Extracted text
//! > first line
//! > second line
//!
//! next paragraph
//! ```
//!
//! Inside a blockquote or callout the block picks up the quote prefix of the
//! embed's line, so it nests instead of breaking out of the quote.
//!
//! [`apply_annotations`] is the only entry point that mutates a note. It
//! works against the content handed over by the store at write time and
//! refuses to touch a note that changed since discovery.

use crate::callout::{header, migrate_legacy_callouts};
use crate::discovery::already_processed;
use crate::document::AttachmentRef;
use std::collections::HashMap;
use tracing::warn;

/// Markup text → extracted markdown, or `None` when there is nothing to insert.
pub type ExtractionResults = HashMap<String, Option<String>>;

/// A callout ready to insert, plus the quote prefix of the embed's line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedCallout {
    pub text: String,
    pub line_prefix: String,
}

/// Format `markdown` as a callout for an embed starting at byte `start` of
/// `content`.
///
/// The quote prefix (leading whitespace and `>` characters) of the text
/// between the start of the embed's line and the embed is replicated on every
/// line of the block. Trailing whitespace is stripped from every line.
pub fn format_callout(markdown: &str, content: &str, start: usize, title: &str) -> FormattedCallout {
    let before = content.get(..start).unwrap_or(content);
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let line_before_embed = &before[line_start..];
    let prefix_len = line_before_embed
        .find(|c: char| !(c.is_whitespace() || c == '>'))
        .unwrap_or(line_before_embed.len());
    let line_prefix = &line_before_embed[..prefix_len];

    let head = format!("> {}", header(title));
    let text = std::iter::once(head)
        .chain(markdown.split('\n').map(|line| format!("> {line}")))
        .map(|line| format!("{line_prefix}{line}").trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n");

    FormattedCallout {
        text,
        line_prefix: line_prefix.to_string(),
    }
}

/// Insert `to_insert` at byte `index` of `original`, guaranteeing exactly one
/// blank line (carrying `blank_line_prefix`, right-trimmed) before and after
/// it.
///
/// Existing blank lines on either side are reused rather than duplicated;
/// content further away is left as is.
///
/// # Panics
///
/// Panics if `index` is not on a `char` boundary of `original`.
pub fn insert_with_blank_lines(
    original: &str,
    to_insert: &str,
    index: usize,
    blank_line_prefix: &str,
) -> String {
    let (before, after) = original.split_at(index);
    let prefix = blank_line_prefix.trim_end();
    let blank = format!("\n{prefix}\n");

    let pad_before = if before.ends_with(&blank) {
        String::new()
    } else if before.ends_with('\n') {
        format!("{prefix}\n")
    } else if !prefix.is_empty() && before.ends_with(&format!("\n{prefix}")) {
        "\n".to_string()
    } else {
        blank.clone()
    };

    let pad_after = if after.starts_with(&blank) {
        String::new()
    } else if after.starts_with('\n') {
        format!("\n{prefix}")
    } else if !prefix.is_empty() && after.starts_with(&format!("{prefix}\n")) {
        "\n".to_string()
    } else {
        blank
    };

    let mut out = String::with_capacity(
        original.len() + to_insert.len() + pad_before.len() + pad_after.len(),
    );
    out.push_str(before);
    out.push_str(&pad_before);
    out.push_str(to_insert);
    out.push_str(&pad_after);
    out.push_str(after);
    out
}

/// What one insertion pass did to a note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertionReport {
    /// New content. Equal to the input when nothing was applied.
    pub content: String,
    /// Indexes (into the `refs` argument) of references that got a callout.
    pub inserted: Vec<usize>,
    /// Indexes of references whose markup was no longer at its offsets.
    pub moved: Vec<usize>,
    /// The whole pass was aborted because the note changed since discovery.
    pub document_changed: bool,
}

/// Insert callouts for `refs` into `current`.
///
/// `snapshot` is the content the references were discovered in. When
/// `current` differs from it nothing is inserted. Otherwise references are
/// processed from the last offset to the first, so every pending offset stays
/// valid. A reference is left alone when it has no extracted text, when the
/// snapshot already has a callout after it, or when its markup is no longer
/// at its recorded span. Legacy callout headers are migrated after the
/// insertions.
pub fn apply_annotations(
    current: &str,
    snapshot: &str,
    refs: &[AttachmentRef],
    results: &ExtractionResults,
    title: &str,
) -> InsertionReport {
    if current != snapshot {
        warn!("Note changed during text extraction, leaving it untouched");
        return InsertionReport {
            content: current.to_string(),
            document_changed: true,
            ..Default::default()
        };
    }

    let mut order: Vec<usize> = (0..refs.len()).collect();
    order.sort_by(|&a, &b| refs[b].start.cmp(&refs[a].start));

    let mut content = current.to_string();
    let mut inserted = Vec::new();
    let mut moved = Vec::new();

    for i in order {
        let r = &refs[i];
        let Some(Some(markdown)) = results.get(&r.original) else {
            continue;
        };
        if already_processed(snapshot, r) {
            continue;
        }
        if content.get(r.start..r.end) != Some(r.original.as_str()) {
            warn!("Embed {} moved during text extraction, skipping", r.original);
            moved.push(i);
            continue;
        }

        let callout = format_callout(markdown, &content, r.start, title);
        content = insert_with_blank_lines(&content, &callout.text, r.end, &callout.line_prefix);
        inserted.push(i);
    }

    if !inserted.is_empty() {
        content = migrate_legacy_callouts(&content, title).into_owned();
    }
    inserted.reverse();
    moved.reverse();

    InsertionReport {
        content,
        inserted,
        moved,
        document_changed: false,
    }
}
