//! Library-level pipeline tests: zip bytes in, analysis outcome out.

use async_trait::async_trait;
use data_profiler::analyze::{AnalysisSettings, Analyzer};
use data_profiler::chunk::chunk_files;
use data_profiler::extract::{extract_archive, ExtractOptions};
use data_profiler::llm::{AttemptOutcome, ChatBackend, ChatReply, ChatRequest, RemoteError, RetryPolicy};
use data_profiler::selection::{select_data_for_prompt, SelectionConfig};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default();
    for (name, body) in entries {
        writer.start_file(*name, opts).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn options() -> ExtractOptions {
    ExtractOptions::new(&["**/*.json".to_string(), "**/*.html".to_string()], 1024 * 1024).unwrap()
}

fn settings(max_chunk_chars: usize, max_files_per_chunk: usize) -> AnalysisSettings {
    AnalysisSettings {
        model: "test-model".into(),
        temperature: 0.7,
        max_tokens: 100,
        system_prompt: "system".into(),
        max_chunk_chars,
        max_files_per_chunk,
        retry: RetryPolicy {
            max_retries: 1,
            base_delay: Duration::ZERO,
        },
        context_limit: None,
        max_continuations: 10,
    }
}

/// Records every user message and replies with a fixed script.
struct Recorder {
    seen: Mutex<Vec<String>>,
    fail_on: Option<usize>,
}

#[async_trait]
impl ChatBackend for Recorder {
    async fn attempt(&self, request: &ChatRequest) -> AttemptOutcome {
        let mut seen = self.seen.lock().unwrap();
        let user = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        seen.push(user);
        let call = seen.len();
        if self.fail_on == Some(call) {
            return AttemptOutcome::Terminal(RemoteError::MalformedResponse("scripted".into()));
        }
        AttemptOutcome::Ok(ChatReply::complete(format!("report {}", call)))
    }
}

#[test]
fn zip_to_chunks_keeps_selected_files_only() {
    let bytes = build_zip(&[
        ("export/ads_information/advertisers.json", "{\"a\":1}"),
        ("export/ads_information/prefs.html", "<p>x</p>"),
        ("export/your_activity/likes.json", "{\"likes\":[]}"),
        ("__MACOSX/export/._prefs.json", "junk"),
        ("export/media/photo.jpg", "binary"),
    ]);
    let files = extract_archive(&bytes, &options()).unwrap();
    assert_eq!(files.len(), 3);

    let config = SelectionConfig::from_json(
        r#"{"profiles":[{"name":"ads","data":["ads_information/prefs.json","ads_information"]}]}"#,
    )
    .unwrap();
    let result = select_data_for_prompt("ads", &files, Some(&config));
    assert!(result.config_found);
    assert_eq!(
        result.used_paths,
        vec![
            "export/ads_information/prefs.html",
            "export/ads_information/advertisers.json",
        ]
    );

    let chunks = chunk_files(&result.selected_files, 1_000, 1);
    assert_eq!(chunks.len(), 2);
    let covered: Vec<&str> = chunks.iter().flat_map(|c| c.paths.iter().map(String::as_str)).collect();
    assert!(!covered.iter().any(|p| p.contains("your_activity")));
}

#[tokio::test]
async fn analysis_sends_one_request_per_chunk_in_order() {
    let bytes = build_zip(&[
        ("a/one.json", "1"),
        ("a/two.json", "22"),
        ("a/three.json", "333"),
    ]);
    let files = extract_archive(&bytes, &options()).unwrap();

    let backend = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
        fail_on: None,
    });
    let analyzer = Analyzer::new(backend.clone(), settings(10_000, 1), "TEMPLATE");
    let outcome = analyzer.analyze(&files).await;

    assert!(outcome.success);
    assert_eq!(outcome.result, "report 3");
    assert_eq!(outcome.stats.chunk_count, 3);
    assert_eq!(outcome.stats.successful_chunks, 3);

    let seen = backend.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].starts_with("TEMPLATE"));
    assert!(seen[0].contains("### FILE: a/one.json"));
    assert!(seen[2].contains("### FILE: a/three.json"));
}

#[tokio::test]
async fn terminal_failure_is_not_retried() {
    let bytes = build_zip(&[("a/one.json", "1"), ("a/two.json", "22")]);
    let files = extract_archive(&bytes, &options()).unwrap();

    let backend = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
        fail_on: Some(1),
    });
    let analyzer = Analyzer::new(backend.clone(), settings(10_000, 1), "T");
    let outcome = analyzer.analyze(&files).await;

    // chunk 1 fails without retry, chunk 2 still runs
    assert_eq!(backend.seen.lock().unwrap().len(), 2);
    assert!(outcome.success);
    assert_eq!(outcome.stats.failed_chunks, vec![1]);
    assert_eq!(outcome.result, "report 2");
}
