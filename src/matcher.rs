//! Path pattern matching for selection profiles.
//!
//! A pattern is either a file reference (ends in `.json`) or a folder
//! reference. Comparison is case-insensitive and treats `\` as `/`.
//!
//! Exports may render the same record as JSON or HTML, so a `.json` file
//! pattern also accepts the `.html` entry with the same stem.

fn normalize(s: &str) -> String {
    s.replace('\\', "/").to_lowercase()
}

/// Returns `true` when `path` is selected by `pattern`.
pub fn matches(path: &str, pattern: &str) -> bool {
    let path = normalize(path);
    let pattern = normalize(pattern);

    if pattern.is_empty() {
        return false;
    }

    if let Some(stem) = pattern.strip_suffix(".json") {
        let html = format!("{}.html", stem);
        return is_file_match(&path, &pattern) || is_file_match(&path, &html);
    }

    path.starts_with(&format!("{}/", pattern)) || path.contains(&format!("/{}/", pattern))
}

fn is_file_match(path: &str, file: &str) -> bool {
    path == file || path.ends_with(&format!("/{}", file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pattern_matches_exact_and_nested() {
        assert!(matches("prefs.json", "prefs.json"));
        assert!(matches("data/ads/prefs.json", "ads/prefs.json"));
        assert!(!matches("data/ads/myprefs.json", "prefs.json"));
    }

    #[test]
    fn json_pattern_matches_html_rendering() {
        for pattern in ["prefs.json", "ads_information/prefs.json", "a/b/c.json"] {
            let html = pattern.replace(".json", ".html");
            assert!(matches(&html, pattern), "{} should match {}", html, pattern);
            assert!(matches(&format!("export/{}", html), pattern));
        }
    }

    #[test]
    fn folder_pattern_matches_children() {
        for folder in ["ads_information", "your_activity/messages"] {
            for rest in ["x.json", "deep/nested/y.html", "z"] {
                let path = format!("{}/{}", folder, rest);
                assert!(matches(&path, folder), "{} should match {}", path, folder);
            }
        }
        assert!(matches("export/ads_information/prefs.json", "ads_information"));
    }

    #[test]
    fn folder_pattern_rejects_unrelated_prefix() {
        assert!(!matches("other/x.json", "ads_information"));
        assert!(!matches("my_ads_information/x.json", "ads_information"));
        assert!(!matches("ads_information_v2/x.json", "ads_information"));
        // The folder itself is not an entry.
        assert!(!matches("ads_information", "ads_information"));
    }

    #[test]
    fn normalizes_case_and_separators() {
        assert!(matches("Data\\Ads_Information\\Prefs.JSON", "ads_information/prefs.json"));
        assert!(matches("DATA/ADS_INFORMATION/x.json", "Ads_Information"));
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        assert!(!matches("a/b.json", ""));
        assert!(!matches("", ""));
    }
}
