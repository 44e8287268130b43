//! Core data models shared by the extraction, selection, chunking, and
//! analysis stages.

use serde::Serialize;
use std::collections::HashMap;

/// One decoded text entry from an export archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Archive-relative path with `/` separators.
    pub path: String,
    pub content: String,
}

/// Ordered set of extracted files, unique by path.
///
/// Insertion order is preserved; it is the "original order" used to break
/// ties when chunking and the order selection iterates candidates in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: Vec<ExtractedFile>,
    index: HashMap<String, usize>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file. Returns `false` (and leaves the set untouched) when
    /// the path is already present.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) -> bool {
        let path = path.into();
        if self.index.contains_key(&path) {
            return false;
        }
        self.index.insert(path.clone(), self.files.len());
        self.files.push(ExtractedFile {
            path,
            content: content.into(),
        });
        true
    }

    /// Look up a file by its exact path.
    pub fn get(&self, path: &str) -> Option<&ExtractedFile> {
        self.index.get(path).map(|&i| &self.files[i])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, ExtractedFile> {
        self.files.iter()
    }

    /// Paths in insertion order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    /// Total content length in characters.
    pub fn total_chars(&self) -> usize {
        self.files.iter().map(|f| f.content.chars().count()).sum()
    }
}

/// Collects `(path, content)` pairs; a repeated path keeps its first content.
impl<P: Into<String>, C: Into<String>> FromIterator<(P, C)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        let mut set = FileSet::new();
        for (path, content) in iter {
            set.insert(path, content);
        }
        set
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a ExtractedFile;
    type IntoIter = std::slice::Iter<'a, ExtractedFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// A named list of path patterns.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SelectionProfile {
    pub name: String,
    #[serde(default)]
    pub data: Vec<String>,
}

/// Outcome of resolving a profile against an extracted file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    pub selected_files: FileSet,
    /// Matched paths in first-seen order; same length as `selected_files`.
    pub used_paths: Vec<String>,
    pub total_file_count: usize,
    pub selected_count: usize,
    /// Whether a named profile with patterns was found.
    pub config_found: bool,
    /// The profile's pattern list, absent when selection failed open.
    pub patterns: Option<Vec<String>>,
}

/// A size-bounded batch of concatenated file entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position.
    pub index: usize,
    pub total: usize,
    /// Paths of the files packed into this chunk, in packing order.
    pub paths: Vec<String>,
    pub text: String,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Processing statistics returned with every analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub total_files: usize,
    pub chunk_count: usize,
    pub successful_chunks: usize,
    /// 1-indexed positions of chunks that exhausted their retries.
    pub failed_chunks: Vec<usize>,
    pub duration_ms: u64,
    pub result_length: usize,
    pub word_count: usize,
    pub estimated_tokens: usize,
}

/// Final result of an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: AnalysisStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_set_keeps_first_insertion() {
        let mut set = FileSet::new();
        assert!(set.insert("a.json", "first"));
        assert!(!set.insert("a.json", "second"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a.json").unwrap().content, "first");
    }

    #[test]
    fn file_set_preserves_order() {
        let set: FileSet = [("z.json", "1"), ("a.json", "2"), ("m.json", "3")]
            .into_iter()
            .collect();
        let paths: Vec<&str> = set.paths().collect();
        assert_eq!(paths, vec!["z.json", "a.json", "m.json"]);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = AnalysisStats {
            failed_chunks: vec![2],
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["failedChunks"], serde_json::json!([2]));
        assert!(json.get("chunkCount").is_some());
    }
}
