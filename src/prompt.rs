//! Prompt template store.
//!
//! Prompts are plain-text files in a directory, addressed by file stem
//! (`prompts/profiler.txt` is the prompt named `profiler`). The store is an
//! ordinary value: construct it, call [`PromptStore::load`], and pass the
//! resulting [`PromptSet`] to whoever needs a template.
//!
//! When the requested name is not present the bundled template compiled
//! into the binary is used instead. Files that cannot be read (bad
//! permissions, invalid UTF-8) are skipped with a warning, so one broken
//! file never hides the others.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Template shipped with the binary.
pub const BUNDLED_PROMPT: &str = include_str!("../prompts/profiler.txt");

const PROMPT_EXTENSIONS: &[&str] = &["txt", "md"];

pub struct PromptStore {
    dir: PathBuf,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Read every readable prompt file in the directory. A missing or
    /// unreadable directory yields an empty set.
    pub fn load(&self) -> PromptSet {
        let mut prompts = BTreeMap::new();
        if !self.dir.is_dir() {
            tracing::debug!(dir = %self.dir.display(), "prompt directory not found");
            return PromptSet { prompts };
        }

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), "cannot read prompt directory: {}", e);
                return PromptSet { prompts };
            }
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), "skipping unreadable prompt entry: {}", e);
                    continue;
                }
            };
            let is_prompt = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| PROMPT_EXTENSIONS.contains(&e));
            if !path.is_file() || !is_prompt {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    prompts.insert(name.to_string(), text);
                }
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable prompt: {}", e),
            }
        }

        tracing::debug!(count = prompts.len(), "prompts loaded");
        PromptSet { prompts }
    }
}

/// Prompts loaded from a [`PromptStore`].
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    prompts: BTreeMap<String, String>,
}

impl PromptSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.prompts.get(name).map(String::as_str)
    }

    /// The named prompt, or [`BUNDLED_PROMPT`] when it is unavailable.
    pub fn resolve(&self, name: &str) -> &str {
        match self.get(name) {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                let available: Vec<&str> = self.names().collect();
                tracing::warn!(prompt = name, ?available, "prompt not found, using bundled template");
                BUNDLED_PROMPT
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_prompts_by_stem() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("profiler.txt"), "custom template").unwrap();
        std::fs::write(tmp.path().join("brief.md"), "brief template").unwrap();
        std::fs::write(tmp.path().join("notes.json"), "{}").unwrap();

        let set = PromptStore::new(tmp.path()).load();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["brief", "profiler"]);
        assert_eq!(set.resolve("profiler"), "custom template");
    }

    #[test]
    fn missing_prompt_falls_back_to_bundled() {
        let set = PromptStore::new("/nonexistent/prompts").load();
        assert!(set.get("profiler").is_none());
        assert_eq!(set.resolve("profiler"), BUNDLED_PROMPT);
    }

    #[test]
    fn undecodable_file_does_not_hide_others() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("profiler.txt"), "custom template").unwrap();
        std::fs::write(tmp.path().join("legacy.txt"), b"caf\xe9").unwrap();

        let set = PromptStore::new(tmp.path()).load();
        assert_eq!(set.resolve("profiler"), "custom template");
        assert!(set.get("legacy").is_none());
        assert_eq!(set.resolve("legacy"), BUNDLED_PROMPT);
    }

    #[test]
    fn blank_prompt_falls_back_to_bundled() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("profiler.txt"), "  \n").unwrap();
        let set = PromptStore::new(tmp.path()).load();
        assert_eq!(set.resolve("profiler"), BUNDLED_PROMPT);
    }
}
