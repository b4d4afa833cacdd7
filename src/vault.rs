//! Filesystem [`DocumentStore`]: a directory of Markdown notes.
//!
//! Notes are the `.md` files under the vault root (hidden directories such as
//! `.obsidian` and `.git` are skipped). Embeds are parsed from the note text
//! itself:
//!
//! - `![[scan.pdf]]`, `![[scan.pdf|alias]]`, `![[scan.pdf#page=2]]`
//! - `![alt](attachments/scan%20one.png)`
//!
//! Embeds inside fenced code blocks and remote (`scheme://`) targets are
//! ignored.
//!
//! A link target resolves, in order, relative to the note's folder, relative
//! to the vault root, then by file name anywhere in the vault when exactly
//! one file carries that name. Targets outside the vault never resolve.
//!
//! Writes are atomic: the new content goes to a temp file in the same
//! directory which is then renamed over the note.

use crate::document::{AttachmentFile, AttachmentRef, DocumentId, DocumentStore};
use crate::error::ExtractError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// A vault rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    /// Open the vault at `root`, which must be an existing directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).map_err(|source| ExtractError::Document {
            path: root.to_path_buf(),
            source,
        })?;
        if !root.is_dir() {
            return Err(ExtractError::InvalidConfig(format!(
                "Vault root '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every note in the vault, sorted by path.
    pub fn notes(&self) -> Vec<DocumentId> {
        let mut notes: Vec<DocumentId> = self
            .files()
            .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("md")))
            .map(DocumentId::new)
            .collect();
        notes.sort();
        notes
    }

    /// Identify a note given as a path, absolute or relative to the current
    /// directory or to the vault root.
    pub fn note_id(&self, path: impl AsRef<Path>) -> Result<DocumentId, ExtractError> {
        let path = path.as_ref();
        let candidate = if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let absolute =
            std::fs::canonicalize(&candidate).map_err(|source| ExtractError::Document {
                path: candidate.clone(),
                source,
            })?;
        let relative = absolute.strip_prefix(&self.root).map_err(|_| {
            ExtractError::InvalidConfig(format!(
                "'{}' is not inside the vault '{}'",
                path.display(),
                self.root.display()
            ))
        })?;
        Ok(DocumentId::new(relative))
    }

    fn absolute(&self, doc: &DocumentId) -> PathBuf {
        self.root.join(doc.path())
    }

    /// All regular files, as paths relative to the root.
    fn files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(&self.root).ok().map(Path::to_path_buf))
    }

    /// `candidate` relative to the root, if it is an existing file inside it.
    fn existing_inside(&self, candidate: &Path) -> Option<PathBuf> {
        let relative = normalise(candidate.strip_prefix(&self.root).ok()?)?;
        let absolute = self.root.join(&relative);
        absolute.is_file().then_some(absolute)
    }

    fn resolve_blocking(&self, link: &str, doc: &DocumentId) -> Option<PathBuf> {
        let note_dir = self
            .absolute(doc)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        if let Some(p) = self.existing_inside(&note_dir.join(link)) {
            return Some(p);
        }
        if let Some(p) = self.existing_inside(&self.root.join(link)) {
            return Some(p);
        }

        let name = Path::new(link).file_name()?;
        let mut matches = self.files().filter(|p| p.file_name() == Some(name));
        let first = matches.next()?;
        if matches.next().is_some() {
            debug!("Link {link} is ambiguous, leaving it unresolved");
            return None;
        }
        Some(self.root.join(first))
    }

    fn io_error(&self, doc: &DocumentId, source: std::io::Error) -> ExtractError {
        ExtractError::Document {
            path: self.absolute(doc),
            source,
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|s| s.starts_with('.'))
}

/// Resolve `.` and `..` lexically; `None` if the path climbs above its start.
fn normalise(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

// ── Embed parsing ────────────────────────────────────────────────────────────

static RE_EMBED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[\[(?P<wiki>[^\[\]\n]+)\]\]|!\[[^\]\n]*\]\((?P<md>[^)\n]+)\)").unwrap()
});

/// Byte ranges covered by fenced code blocks (``` or ~~~).
fn fenced_ranges(content: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut open: Option<(usize, &str)> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let fence = ["```", "~~~"].into_iter().find(|f| trimmed.starts_with(f));
        match (open, fence) {
            (None, Some(f)) => open = Some((offset, f)),
            (Some((start, f)), Some(g)) if f == g => {
                ranges.push(start..offset + line.len());
                open = None;
            }
            _ => {}
        }
        offset += line.len();
    }
    if let Some((start, _)) = open {
        ranges.push(start..content.len());
    }
    ranges
}

fn wiki_target(inner: &str) -> &str {
    let target = inner.split('|').next().unwrap_or(inner);
    target.split(['#', '^']).next().unwrap_or(target).trim()
}

fn markdown_target(inner: &str) -> String {
    let inner = inner.trim();
    let target = match inner.strip_prefix('<') {
        Some(rest) => rest.split('>').next().unwrap_or(rest),
        None => inner.split_whitespace().next().unwrap_or(inner),
    };
    target.replace("%20", " ")
}

/// Parse the embeds of a note, in document order.
pub fn parse_embeds(content: &str) -> Vec<AttachmentRef> {
    let fenced = fenced_ranges(content);
    RE_EMBED
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if fenced.iter().any(|r| r.contains(&whole.start())) {
                return None;
            }
            let link = match (caps.name("wiki"), caps.name("md")) {
                (Some(w), _) => wiki_target(w.as_str()).to_string(),
                (_, Some(m)) => markdown_target(m.as_str()),
                _ => return None,
            };
            if link.is_empty() || link.contains("://") {
                return None;
            }
            Some(AttachmentRef::new(whole.as_str(), link, whole.start()))
        })
        .collect()
}

// ── DocumentStore ────────────────────────────────────────────────────────────

#[async_trait]
impl DocumentStore for FsVault {
    async fn read_snapshot(&self, doc: &DocumentId) -> Result<String, ExtractError> {
        tokio::fs::read_to_string(self.absolute(doc))
            .await
            .map_err(|e| self.io_error(doc, e))
    }

    async fn references(
        &self,
        _doc: &DocumentId,
        snapshot: &str,
    ) -> Result<Vec<AttachmentRef>, ExtractError> {
        Ok(parse_embeds(snapshot))
    }

    async fn resolve_reference(&self, link: &str, doc: &DocumentId) -> Option<AttachmentFile> {
        let vault = self.clone();
        let link_owned = link.to_string();
        let doc_owned = doc.clone();
        let path = tokio::task::spawn_blocking(move || vault.resolve_blocking(&link_owned, &doc_owned))
            .await
            .ok()??;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| link.to_string());
        Some(AttachmentFile { path, name })
    }

    async fn read_binary(&self, file: &AttachmentFile) -> Result<Vec<u8>, ExtractError> {
        tokio::fs::read(&file.path)
            .await
            .map_err(|source| ExtractError::Document {
                path: file.path.clone(),
                source,
            })
    }

    async fn mutate(
        &self,
        doc: &DocumentId,
        f: &mut (dyn for<'s> FnMut(&'s str) -> String + Send),
    ) -> Result<(), ExtractError> {
        let path = self.absolute(doc);
        let current = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| self.io_error(doc, e))?;
        let updated = f(&current);
        if updated == current {
            return Ok(());
        }

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, updated.as_bytes()))
            .await
            .map_err(|e| ExtractError::Internal(format!("Write task panicked: {e}")))?
            .map_err(|e| self.io_error(doc, e))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault_with(files: &[(&str, &[u8])]) -> (TempDir, FsVault) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let vault = FsVault::open(dir.path()).unwrap();
        (dir, vault)
    }

    // ── parse_embeds ─────────────────────────────────────────────────────────

    #[test]
    fn parses_wiki_and_markdown_embeds() {
        let content = "A ![[scan.pdf]] and ![[img.png|300]] and ![pic](files/my%20pic.jpg \"t\")";
        let refs = parse_embeds(content);
        let links: Vec<_> = refs.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(links, vec!["scan.pdf", "img.png", "files/my pic.jpg"]);
        for r in &refs {
            assert_eq!(&content[r.start..r.end], r.original);
        }
    }

    #[test]
    fn strips_heading_and_block_suffixes() {
        let refs = parse_embeds("![[doc.pdf#page=3]] ![[doc.pdf^block]]");
        assert!(refs.iter().all(|r| r.link == "doc.pdf"));
    }

    #[test]
    fn ignores_fenced_code_and_remote_urls() {
        let content = "```\n![[in-code.pdf]]\n```\n![](https://example.com/x.png)\n~~~md\n![[also.pdf]]\n~~~\n![[real.pdf]]";
        let refs = parse_embeds(content);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].link, "real.pdf");
    }

    #[test]
    fn plain_links_are_not_embeds() {
        assert!(parse_embeds("[[note]] and [text](file.pdf)").is_empty());
    }

    #[test]
    fn offsets_are_bytes_with_multibyte_text() {
        let content = "Ünïcödé ✓ ![[scan.pdf]]";
        let refs = parse_embeds(content);
        assert_eq!(&content[refs[0].start..refs[0].end], "![[scan.pdf]]");
    }

    // ── resolution ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn resolves_relative_root_and_by_name() {
        let (_dir, vault) = vault_with(&[
            ("notes/today.md", b"x"),
            ("notes/local.png", b"png"),
            ("top.pdf", b"pdf"),
            ("attachments/deep/far.jpg", b"jpg"),
        ]);
        let doc = DocumentId::from("notes/today.md");

        let local = vault.resolve_reference("local.png", &doc).await.unwrap();
        assert!(local.path.ends_with("notes/local.png"));
        assert_eq!(local.name, "local.png");

        let top = vault.resolve_reference("top.pdf", &doc).await.unwrap();
        assert!(top.path.ends_with("top.pdf"));

        let far = vault.resolve_reference("far.jpg", &doc).await.unwrap();
        assert!(far.path.ends_with("attachments/deep/far.jpg"));

        assert!(vault.resolve_reference("missing.pdf", &doc).await.is_none());
    }

    #[tokio::test]
    async fn ambiguous_and_escaping_links_do_not_resolve() {
        let (_dir, vault) = vault_with(&[
            ("n.md", b"x"),
            ("a/dup.png", b"1"),
            ("b/dup.png", b"2"),
        ]);
        let doc = DocumentId::from("n.md");
        assert!(vault.resolve_reference("dup.png", &doc).await.is_none());
        assert!(vault.resolve_reference("../../etc/passwd", &doc).await.is_none());
    }

    #[test]
    fn lists_notes_skipping_hidden_dirs() {
        let (_dir, vault) = vault_with(&[
            ("b.md", b""),
            ("a/c.md", b""),
            (".obsidian/workspace.md", b""),
            ("img.png", b""),
        ]);
        let notes: Vec<String> = vault.notes().iter().map(|d| d.to_string()).collect();
        assert_eq!(notes, vec!["a/c.md", "b.md"]);
    }

    // ── mutate ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn mutate_writes_new_content() {
        let (dir, vault) = vault_with(&[("n.md", b"hello")]);
        let doc = DocumentId::from("n.md");
        vault
            .mutate(&doc, &mut |current: &str| format!("{current} world"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("n.md")).unwrap(), "hello world");
        assert_eq!(vault.read_snapshot(&doc).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn references_index_the_given_snapshot() {
        let (dir, vault) = vault_with(&[("n.md", b"see ![[a.pdf]]")]);
        let doc = DocumentId::from("n.md");
        let snapshot = vault.read_snapshot(&doc).await.unwrap();
        std::fs::write(dir.path().join("n.md"), "edited\n\nsee ![[b.pdf]]").unwrap();

        let refs = vault.references(&doc, &snapshot).await.unwrap();
        assert_eq!(refs, vec![AttachmentRef::new("![[a.pdf]]", "a.pdf", 4)]);
    }

    #[test]
    fn note_id_from_relative_path() {
        let (_dir, vault) = vault_with(&[("sub/n.md", b"")]);
        let id = vault.note_id("sub/n.md").unwrap();
        assert_eq!(id, DocumentId::from("sub/n.md"));
        assert!(vault.note_id("nope.md").is_err());
    }
}
