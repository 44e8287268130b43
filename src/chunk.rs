//! File-boundary chunker.
//!
//! Packs selected files into [`Chunk`]s bounded by a character budget and a
//! file count. A file is never split: each file's formatted entry lands
//! whole in exactly one chunk. Files are packed smallest first (stable on
//! ties) so a large file early in the export cannot leave a chunk
//! under-filled.
//!
//! A file whose entry alone exceeds the budget still gets its own chunk;
//! the budget steers packing but never truncates content.

use crate::models::{Chunk, FileSet};

/// Header line written before every file's content.
pub fn format_entry(path: &str, content: &str) -> String {
    format!("\n\n### FILE: {}\n\n{}", path, content)
}

/// Split `files` into ordered chunks. Empty input yields no chunks.
///
/// `max_files_per_chunk` of zero is treated as one.
pub fn chunk_files(files: &FileSet, max_chunk_chars: usize, max_files_per_chunk: usize) -> Vec<Chunk> {
    let max_files = max_files_per_chunk.max(1);

    let mut ordered: Vec<_> = files.iter().collect();
    ordered.sort_by_key(|f| f.content.chars().count());

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;
    let mut paths: Vec<String> = Vec::new();

    for file in ordered {
        let entry = format_entry(&file.path, &file.content);
        let entry_chars = entry.chars().count();

        let over_budget = buf_chars + entry_chars > max_chunk_chars;
        let full = paths.len() >= max_files;

        if !paths.is_empty() && (over_budget || full) {
            chunks.push(make_chunk(chunks.len(), std::mem::take(&mut paths), std::mem::take(&mut buf)));
            buf_chars = 0;
        }

        buf.push_str(&entry);
        buf_chars += entry_chars;
        paths.push(file.path.clone());
    }

    if !paths.is_empty() {
        chunks.push(make_chunk(chunks.len(), paths, buf));
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.total = total;
    }

    chunks
}

fn make_chunk(index: usize, paths: Vec<String>, text: String) -> Chunk {
    Chunk {
        index,
        total: 0,
        paths,
        text,
    }
}
