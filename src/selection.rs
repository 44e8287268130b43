//! Profile-driven file selection.
//!
//! A selection configuration is a JSON document listing named profiles,
//! each with an ordered list of path patterns (see [`crate::matcher`]).
//! Both of these shapes are accepted:
//!
//! ```json
//! { "profiles": [ { "name": "minimal", "data": ["ads_information"] } ] }
//! ```
//!
//! ```json
//! [ { "name": "minimal", "data": ["ads_information"] } ]
//! ```
//!
//! Selection never fails. A missing or unreadable configuration, an unknown
//! profile, or a profile without patterns all fall back to selecting every
//! extracted file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::matcher::matches;
use crate::models::{FileSet, SelectionProfile, SelectionResult};

/// Parsed selection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionConfig {
    pub profiles: Vec<SelectionProfile>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelectionConfig {
    List(Vec<SelectionProfile>),
    Wrapped {
        #[serde(alias = "prompts")]
        profiles: Vec<SelectionProfile>,
    },
}

impl SelectionConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawSelectionConfig =
            serde_json::from_str(text).context("Failed to parse selection config")?;
        let profiles = match raw {
            RawSelectionConfig::List(p) => p,
            RawSelectionConfig::Wrapped { profiles } => profiles,
        };
        Ok(Self { profiles })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read selection config: {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn find(&self, name: &str) -> Option<&SelectionProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.name.as_str())
    }
}

/// Resolve `profile_name` against `files` using an already loaded config.
///
/// `None` means no configuration could be loaded.
pub fn select_data_for_prompt(
    profile_name: &str,
    files: &FileSet,
    config: Option<&SelectionConfig>,
) -> SelectionResult {
    let profile = config
        .filter(|c| !c.profiles.is_empty())
        .and_then(|c| c.find(profile_name))
        .filter(|p| !p.data.is_empty());

    let Some(profile) = profile else {
        let available: Vec<&str> = config.map(|c| c.profile_names().collect()).unwrap_or_default();
        tracing::warn!(
            profile = profile_name,
            ?available,
            "no selection profile found, using all {} files",
            files.len()
        );
        return select_all(files);
    };

    let mut selected = FileSet::new();
    let mut used_paths = Vec::new();

    for pattern in &profile.data {
        let mut hits = 0usize;
        for file in files {
            if !matches(&file.path, pattern) {
                continue;
            }
            hits += 1;
            if selected.insert(file.path.clone(), file.content.clone()) {
                used_paths.push(file.path.clone());
            }
        }
        tracing::debug!(pattern = %pattern, hits, "pattern resolved");
    }

    tracing::info!(
        profile = profile_name,
        selected = used_paths.len(),
        total = files.len(),
        "selection complete"
    );

    SelectionResult {
        selected_count: used_paths.len(),
        total_file_count: files.len(),
        selected_files: selected,
        used_paths,
        config_found: true,
        patterns: Some(profile.data.clone()),
    }
}

/// Load the configuration at `path` and select. Load errors fail open.
pub fn select_with_config_file(
    profile_name: &str,
    files: &FileSet,
    path: &Path,
) -> SelectionResult {
    let config = match SelectionConfig::load(path) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!("{:#}", e);
            None
        }
    };
    select_data_for_prompt(profile_name, files, config.as_ref())
}

fn select_all(files: &FileSet) -> SelectionResult {
    SelectionResult {
        selected_files: files.clone(),
        used_paths: files.paths().map(str::to_string).collect(),
        total_file_count: files.len(),
        selected_count: files.len(),
        config_found: false,
        patterns: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export() -> FileSet {
        [
            ("data/ads_information/prefs.json", "{\"prefs\":[]}"),
            ("data/other/x.json", "{}"),
            ("data/your_activity/posts.html", "<p>hi</p>"),
        ]
        .into_iter()
        .collect()
    }

    fn config() -> SelectionConfig {
        SelectionConfig::from_json(
            r#"{ "profiles": [
                { "name": "minimal", "data": ["ads_information"] },
                { "name": "overlap", "data": ["posts.json", "your_activity", "ads_information"] },
                { "name": "empty", "data": [] }
            ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn minimal_profile_selects_folder() {
        let result = select_data_for_prompt("minimal", &export(), Some(&config()));
        assert!(result.config_found);
        assert_eq!(result.used_paths, vec!["data/ads_information/prefs.json"]);
        assert_eq!(result.selected_count, 1);
        assert_eq!(result.total_file_count, 3);
        assert!(result.selected_files.contains("data/ads_information/prefs.json"));
        assert!(!result.selected_files.contains("data/other/x.json"));
        assert_eq!(result.patterns, Some(vec!["ads_information".to_string()]));
    }

    #[test]
    fn overlapping_patterns_dedupe_in_first_seen_order() {
        let result = select_data_for_prompt("overlap", &export(), Some(&config()));
        assert_eq!(
            result.used_paths,
            vec![
                "data/your_activity/posts.html",
                "data/ads_information/prefs.json"
            ]
        );
        assert_eq!(result.used_paths.len(), result.selected_files.len());
    }

    #[test]
    fn unknown_profile_fails_open() {
        let files = export();
        let result = select_data_for_prompt("nope", &files, Some(&config()));
        assert!(!result.config_found);
        assert_eq!(result.selected_files, files);
        assert_eq!(result.used_paths.len(), 3);
        assert!(result.patterns.is_none());
    }

    #[test]
    fn profile_without_patterns_fails_open() {
        let result = select_data_for_prompt("empty", &export(), Some(&config()));
        assert!(!result.config_found);
        assert_eq!(result.selected_count, 3);
    }

    #[test]
    fn missing_config_fails_open() {
        let files = export();
        let result =
            select_with_config_file("minimal", &files, Path::new("/nonexistent/selection.json"));
        assert!(!result.config_found);
        assert_eq!(result.selected_files, files);
    }

    #[test]
    fn malformed_config_fails_open() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "{ not json").unwrap();
        let result = select_with_config_file("minimal", &export(), tmp.path());
        assert!(!result.config_found);
    }

    #[test]
    fn bare_list_and_prompts_alias_parse() {
        let list = SelectionConfig::from_json(r#"[{"name":"a","data":["x"]}]"#).unwrap();
        let alias = SelectionConfig::from_json(r#"{"prompts":[{"name":"a","data":["x"]}]}"#).unwrap();
        assert_eq!(list, alias);
        assert_eq!(list.profile_names().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn selection_is_idempotent() {
        let files = export();
        let cfg = config();
        let first = select_data_for_prompt("overlap", &files, Some(&cfg));
        let second = select_data_for_prompt("overlap", &files, Some(&cfg));
        assert_eq!(first, second);
    }
}
