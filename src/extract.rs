//! Export archive extraction.
//!
//! Turns a zip export (or a directory an export was already unpacked into)
//! into a [`FileSet`] of decoded text entries. Only entries matching the
//! configured include globs are kept (`**/*.json` and `**/*.html` by
//! default); everything else in the export (photos, videos) is ignored.
//!
//! Individual entries that cannot be read, or that exceed
//! `max_entry_bytes` once decompressed, are skipped with a warning. Only a
//! container that cannot be opened at all is an error.
//!
//! Content is decoded as UTF-8; bytes that are not valid UTF-8 are decoded
//! as Latin-1 instead, so accented text from older exports survives.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ExtractConfig;
use crate::models::FileSet;

/// Entries under these prefixes are archiver metadata, not export data.
const IGNORED_PREFIXES: &[&str] = &["__MACOSX/"];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid include pattern: {0}")]
    Pattern(String),
    #[error("cannot open archive: {0}")]
    Archive(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which entries to keep and how large they may be.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    include: GlobSet,
    max_entry_bytes: u64,
    follow_symlinks: bool,
}

impl ExtractOptions {
    pub fn new(include_globs: &[String], max_entry_bytes: u64) -> Result<Self, ExtractError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in include_globs {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ExtractError::Pattern(e.to_string()))?;
            builder.add(glob);
        }
        let include = builder
            .build()
            .map_err(|e| ExtractError::Pattern(e.to_string()))?;
        Ok(Self {
            include,
            max_entry_bytes,
            follow_symlinks: false,
        })
    }

    /// Follow symbolic links when walking an unpacked export.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn from_config(config: &ExtractConfig) -> Result<Self, ExtractError> {
        Ok(Self::new(&config.include_globs, config.max_entry_bytes)?.follow_symlinks(config.follow_symlinks))
    }

    fn wants(&self, path: &str) -> bool {
        !IGNORED_PREFIXES.iter().any(|p| path.starts_with(p)) && self.include.is_match(path)
    }
}

fn normalize_path(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches("./").to_string()
}

/// Extract matching text entries from an in-memory zip archive.
pub fn extract_archive(bytes: &[u8], opts: &ExtractOptions) -> Result<FileSet, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))?;

    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for i in 0..archive.len() {
        let entry = match archive.by_index(i) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(index = i, "skipping unreadable archive entry: {}", e);
                skipped += 1;
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let path = normalize_path(entry.name());
        if !opts.wants(&path) {
            continue;
        }

        match read_bounded(entry, opts.max_entry_bytes) {
            Ok(Some(content)) => entries.push((path, content)),
            Ok(None) => {
                tracing::warn!(path = %path, limit = opts.max_entry_bytes, "skipping oversized entry");
                skipped += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path, "skipping unreadable entry: {}", e);
                skipped += 1;
            }
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    tracing::info!(extracted = entries.len(), skipped, "archive extracted");
    Ok(entries.into_iter().collect())
}

/// Extract matching files from an unpacked export directory. Paths are
/// relative to `root`. Files and subdirectories that cannot be read are
/// skipped.
pub fn extract_dir(root: &Path, opts: &ExtractOptions) -> Result<FileSet, ExtractError> {
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(root).follow_links(opts.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(ExtractError::Io {
                    path: root.display().to_string(),
                    source: e.into(),
                })
            }
            Err(e) => {
                tracing::warn!("skipping unreadable path: {}", e);
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let path = normalize_path(&relative.to_string_lossy());
        if !opts.wants(&path) {
            continue;
        }

        let read = std::fs::File::open(entry.path())
            .and_then(|file| read_bounded(file, opts.max_entry_bytes));
        match read {
            Ok(Some(content)) => entries.push((path, content)),
            Ok(None) => {
                tracing::warn!(path = %path, limit = opts.max_entry_bytes, "skipping oversized file");
                skipped += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path, "skipping unreadable file: {}", e);
                skipped += 1;
            }
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    tracing::info!(extracted = entries.len(), skipped, root = %root.display(), "directory extracted");
    Ok(entries.into_iter().collect())
}

/// Extract from a zip file or a directory, whichever `path` is.
pub fn extract_path(path: &Path, opts: &ExtractOptions) -> Result<FileSet, ExtractError> {
    if path.is_dir() {
        return extract_dir(path, opts);
    }
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    extract_archive(&bytes, opts)
}

/// Read at most `max_bytes` and decode. `None` when the source is larger
/// than the limit.
fn read_bounded(reader: impl Read, max_bytes: u64) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    reader.take(max_bytes.saturating_add(1)).read_to_end(&mut buf)?;
    if buf.len() as u64 > max_bytes {
        return Ok(None);
    }
    Ok(Some(decode_text(buf)))
}

/// UTF-8 when valid, otherwise Latin-1 (every byte maps to `U+0000..=U+00FF`).
fn decode_text(buf: Vec<u8>) -> String {
    match String::from_utf8(buf) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| char::from(b)).collect(),
    }
}
