//! Human-readable markdown mirror
//!
//! The mirror is a convenience projection, never the system of record.
//! Layout under the vault root:
//!
//! ```text
//! vault/
//! ├── knowledge/
//! │   └── coding.md          # "## Summary" block + "## Entries" list
//! ├── preferences/
//! │   └── coding-languages.md
//! └── timeline/
//!     └── 2026-10.md         # one file per month
//! ```
//!
//! Every string is sanitized before it reaches disk.

use crate::capability::DocumentMirror;
use crate::error::{Error, Result};
use crate::memory::CategoryPath;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Longest entry written to the mirror, in characters
pub const MAX_ENTRY_CHARS: usize = 10_000;

const SUMMARY_HEADING: &str = "## Summary";
const ENTRIES_HEADING: &str = "## Entries";
const EMPTY_SUMMARY: &str = "(no summary yet)";

/// Strips markup and control characters from mirror text
pub struct Sanitizer {
    script: Regex,
    tag: Regex,
    control: Regex,
    traversal: Regex,
}

impl Sanitizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Mirror(format!("invalid sanitizer pattern: {e}")))
        };
        Ok(Self {
            script: compile(r"(?is)<script[^>]*>.*?</script>")?,
            tag: compile(r"<[^>]+>")?,
            control: compile(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]")?,
            traversal: compile(r"\.\./")?,
        })
    }

    /// Clean `text` for storage in a markdown file
    pub fn sanitize(&self, text: &str) -> String {
        let text = self.script.replace_all(text, "");
        let text = self.tag.replace_all(&text, "");
        let text = self.control.replace_all(&text, "");
        let text = self.traversal.replace_all(&text, "");
        let text = text.trim();
        if text.chars().count() > MAX_ENTRY_CHARS {
            let cut: String = text.chars().take(MAX_ENTRY_CHARS).collect();
            format!("{cut}... [truncated]")
        } else {
            text.to_string()
        }
    }

    /// Single-line form used for list entries
    pub fn sanitize_line(&self, text: &str) -> String {
        self.sanitize(text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Markdown vault on the local filesystem
pub struct MarkdownMirror {
    root: PathBuf,
    sanitizer: Sanitizer,
    /// Serializes read-modify-write of category files
    write_lock: Mutex<()>,
}

impl MarkdownMirror {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            sanitizer: Sanitizer::new()?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing a category
    pub fn category_file(&self, path: &CategoryPath) -> PathBuf {
        let mut file = self.root.clone();
        for segment in path.as_str().split('/') {
            file.push(segment);
        }
        file.set_extension("md");
        file
    }

    fn timeline_file(&self) -> PathBuf {
        self.root
            .join("timeline")
            .join(format!("{}.md", Utc::now().format("%Y-%m")))
    }

    fn stamp() -> String {
        Utc::now().format("%Y-%m-%d %H:%M").to_string()
    }

    fn category_header(path: &CategoryPath) -> String {
        format!(
            "# {}\n\nCategory: `{}`\n\n{SUMMARY_HEADING}\n\n{EMPTY_SUMMARY}\n\n{ENTRIES_HEADING}\n\n",
            path.name(),
            path
        )
    }

    async fn ensure_category_file(&self, path: &CategoryPath) -> Result<PathBuf> {
        let file = self.category_file(path);
        if !tokio::fs::try_exists(&file).await? {
            if let Some(parent) = file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&file, Self::category_header(path)).await?;
        }
        Ok(file)
    }

    async fn append_line(file: &Path, line: &str) -> Result<()> {
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .await?;
        handle.write_all(line.as_bytes()).await?;
        handle.flush().await?;
        Ok(())
    }
}

/// Replace the body of the summary section, rebuilding the layout if the
/// headings were edited away.
fn replace_summary(document: &str, path: &CategoryPath, summary: &str) -> String {
    let summary_at = document.find(SUMMARY_HEADING);
    let entries_at = document.find(ENTRIES_HEADING);
    match (summary_at, entries_at) {
        (Some(s), Some(e)) if s < e => format!(
            "{}{SUMMARY_HEADING}\n\n{summary}\n\n{}",
            &document[..s],
            &document[e..]
        ),
        _ => {
            let entries = entries_at
                .map(|e| document[e + ENTRIES_HEADING.len()..].trim_start_matches('\n'))
                .unwrap_or("");
            format!(
                "# {}\n\nCategory: `{}`\n\n{SUMMARY_HEADING}\n\n{summary}\n\n{ENTRIES_HEADING}\n\n{entries}",
                path.name(),
                path
            )
        }
    }
}

#[async_trait]
impl DocumentMirror for MarkdownMirror {
    async fn append_to_category(&self, path: &CategoryPath, entry: &str) -> Result<()> {
        let line = format!("- [{}] {}\n", Self::stamp(), self.sanitizer.sanitize_line(entry));
        let _guard = self.write_lock.lock().await;
        let file = self.ensure_category_file(path).await?;
        Self::append_line(&file, &line).await
    }

    async fn append_to_timeline(&self, entry: &str) -> Result<()> {
        let file = self.timeline_file();
        let line = format!("- [{}] {}\n", Self::stamp(), self.sanitizer.sanitize_line(entry));
        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(&file).await? {
            if let Some(parent) = file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let header = format!("# Timeline - {}\n\n", Utc::now().format("%B %Y"));
            tokio::fs::write(&file, header).await?;
        }
        Self::append_line(&file, &line).await
    }

    async fn update_category_summary(&self, path: &CategoryPath, text: &str) -> Result<()> {
        let summary = self.sanitizer.sanitize(text);
        let _guard = self.write_lock.lock().await;
        let file = self.ensure_category_file(path).await?;
        let document = tokio::fs::read_to_string(&file).await?;
        let updated = replace_summary(&document, path, &summary);
        tokio::fs::write(&file, updated).await?;
        Ok(())
    }
}

/// Mirror that discards every write
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMirror;

#[async_trait]
impl DocumentMirror for NullMirror {
    async fn append_to_category(&self, _path: &CategoryPath, _entry: &str) -> Result<()> {
        Ok(())
    }

    async fn append_to_timeline(&self, _entry: &str) -> Result<()> {
        Ok(())
    }

    async fn update_category_summary(&self, _path: &CategoryPath, _text: &str) -> Result<()> {
        Ok(())
    }
}
