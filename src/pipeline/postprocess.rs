//! Post-processing: backend-specific cleanup of page text.
//!
//! The shared backend contract only trims pages and drops the empty ones, so
//! text a backend returns reaches the note as is. The two backends whose raw
//! output does not fit inside a callout apply one of these passes themselves:
//!
//! - Vision models wrap output in ` ```markdown ... ``` ` fences and pad it
//!   with blank lines, handled by [`clean_model_output`]
//! - Cloud OCR emits `![img-0.jpeg](img-0.jpeg)` links to images it did not
//!   return, handled by [`drop_image_links`]
//!
//! Each rule is a pure `&str → String` pass. Line endings are normalised
//! before anything splits on `\n`, fences are stripped before trimming so the
//! fence regex sees the raw shape.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one page of vision-model output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF, CR, form feed → LF)
/// 2. Strip outer markdown fences
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Collapse 2+ consecutive blank lines down to 1
pub fn clean_model_output(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_markdown_fences(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace(['\r', '\u{000C}'], "\n")
}

// ── Rule 2: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Image links ──────────────────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// Replace inline image links with their alt text.
///
/// The cloud OCR API is asked not to return images but still links them.
/// Left in a note, `![img-0.jpeg](img-0.jpeg)` would be parsed as an embed on
/// the next run and reported as a missing attachment every time. A link whose
/// alt text is empty or just the file name disappears, any other alt text is
/// kept in italics.
pub fn drop_image_links(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures| {
            let alt = caps[1].trim();
            // Cloud OCR uses the image file name as alt text.
            if alt.is_empty() || alt == caps[2].trim() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .to_string()
}

// ── Rule 3: Invisible characters ─────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trailing whitespace ──────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Blank lines ──────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        let input = "```markdown\n# Hello\n\nWorld\n```";
        assert_eq!(strip_markdown_fences(input), "# Hello\n\nWorld");
    }

    #[test]
    fn test_no_fences_passthrough() {
        assert_eq!(strip_markdown_fences("plain text"), "plain text");
    }

    #[test]
    fn test_line_endings_and_form_feed() {
        assert_eq!(normalise_line_endings("a\r\nb\rc\u{000C}"), "a\nb\nc\n");
    }

    #[test]
    fn test_image_links() {
        assert_eq!(drop_image_links("see ![img-0.jpeg](img-0.jpeg) here"), "see  here");
        assert_eq!(drop_image_links("![Figure 1](fig.png)"), "*Figure 1*");
        assert_eq!(drop_image_links("![](x.png)"), "");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("he\u{200B}llo\u{FEFF}"), "hello");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_clean_model_output_full() {
        let raw = "```\r\nInvoice 42  \r\n\r\n\r\n\r\nTotal: 10\r\n```\r\n";
        assert_eq!(clean_model_output(raw), "Invoice 42\n\nTotal: 10");
    }

    #[test]
    fn test_model_output_keeps_image_links() {
        assert_eq!(clean_model_output("![chart](chart.png)"), "![chart](chart.png)");
    }

    #[test]
    fn test_whitespace_only_output_is_empty() {
        assert_eq!(clean_model_output(" \n\u{000C}\n \t"), "");
    }
}
