//! Analysis driver.
//!
//! Chunks the selected files, submits each chunk to the model in order, and
//! assembles the final report with processing statistics.
//!
//! # Multi-chunk runs
//!
//! When the data does not fit in one chunk, every request carries a note
//! telling the model where the chunk sits in the sequence (first chunk:
//! learn the structure; middle: keep going; last: write the full report).
//! Chunks are submitted strictly in order and never in parallel.
//!
//! Each successful chunk *replaces* the running result, so the report is
//! the output of the last chunk that succeeded. A chunk that exhausts its
//! retries is recorded in [`AnalysisStats::failed_chunks`] and the run
//! moves on. The run succeeds when no chunk failed or when some chunk
//! produced output.
//!
//! # Continuations
//!
//! A reply cut off by `max_tokens` (finish reason other than `stop`) is
//! continued: the text so far goes back as an assistant turn followed by a
//! request to carry on without repeating, and the new text is appended.
//! This repeats at most `max_continuations` times per chunk. A continuation
//! that fails keeps the partial text.

use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::chunk::chunk_files;
use crate::config::Config;
use crate::llm::{submit_with_retry, ChatBackend, ChatMessage, ChatRequest, RemoteError, RetryPolicy};
use crate::models::{AnalysisOutcome, AnalysisStats, Chunk, FileSet};

/// Characters per token used for the rough size estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Trailing characters quoted back to the model when asking it to continue.
const CONTINUATION_TAIL_CHARS: usize = 100;

/// Failures that end a run before any request is sent.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("no data to analyze: the selection contains no files")]
    NoData,
}

/// Everything the driver needs besides the backend and the template.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub max_chunk_chars: usize,
    pub max_files_per_chunk: usize,
    pub retry: RetryPolicy,
    /// Estimated-token budget that triggers an oversize warning.
    pub context_limit: Option<usize>,
    /// Follow-up requests allowed for one truncated chunk reply.
    pub max_continuations: u32,
}

impl AnalysisSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.model.clone(),
            temperature: config.model.temperature,
            max_tokens: config.model.max_tokens,
            system_prompt: config.model.system_prompt.clone(),
            max_chunk_chars: config.chunking.max_chunk_chars,
            max_files_per_chunk: config.chunking.max_files_per_chunk,
            retry: RetryPolicy::from(&config.retry),
            context_limit: config.model.context_limit(),
            max_continuations: config.model.max_continuations,
        }
    }
}

/// Position note added to each request of a multi-chunk run.
pub fn chunk_note(index: usize, total: usize) -> Option<String> {
    if total <= 1 {
        return None;
    }
    let part = index + 1;
    let note = if index == 0 {
        format!(
            "NOTE: The data is split into {total} parts. This is part 1 of {total}. \
             Focus on understanding the structure and content of the data; \
             the remaining parts will follow."
        )
    } else if part < total {
        format!(
            "NOTE: This is part {part} of {total}. Continue analyzing, building on \
             what you learned from the previous parts."
        )
    } else {
        format!(
            "NOTE: This is the final part ({part} of {total}). Produce the complete \
             final output, covering everything from all parts."
        )
    };
    Some(note)
}

/// Follow-up turn asking the model to resume a truncated reply.
pub fn continuation_prompt(so_far: &str) -> String {
    let start = so_far
        .char_indices()
        .rev()
        .nth(CONTINUATION_TAIL_CHARS - 1)
        .map_or(0, |(i, _)| i);
    format!(
        "Continue from where you left off. Do not repeat any content already \
         generated. The last part ended with: '{}'.",
        &so_far[start..]
    )
}

/// Runs a file set through the model, one chunk at a time.
///
/// The backend is shared behind an `Arc` so the proxy can build one
/// analyzer per request around a pooled HTTP client.
pub struct Analyzer {
    backend: Arc<dyn ChatBackend>,
    settings: AnalysisSettings,
    template: String,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: AnalysisSettings, template: impl Into<String>) -> Self {
        Self {
            backend,
            settings,
            template: template.into(),
        }
    }

    /// Build the chat request for one chunk.
    pub fn build_request(&self, chunk: &Chunk) -> ChatRequest {
        let mut user = self.template.clone();
        if let Some(note) = chunk_note(chunk.index, chunk.total) {
            user.push_str("\n\n");
            user.push_str(&note);
        }
        user.push_str("\n\nHere is the data:\n\n");
        user.push_str(&chunk.text);

        ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(self.settings.system_prompt.clone()),
                ChatMessage::user(user),
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Submit one chunk with the configured retry policy, continuing a
    /// truncated reply up to `max_continuations` times.
    pub async fn submit(&self, chunk: &Chunk) -> Result<String, RemoteError> {
        let mut request = self.build_request(chunk);
        let reply = submit_with_retry(self.backend.as_ref(), &request, self.settings.retry).await?;

        let mut truncated = reply.is_truncated();
        let mut text = reply.content;
        let mut continuations = 0u32;

        while truncated && continuations < self.settings.max_continuations {
            continuations += 1;
            tracing::info!(
                chunk = chunk.index + 1,
                continuation = continuations,
                chars = text.chars().count(),
                "reply truncated, requesting continuation"
            );

            request.messages.truncate(2);
            request.messages.push(ChatMessage::assistant(text.clone()));
            request.messages.push(ChatMessage::user(continuation_prompt(&text)));

            match submit_with_retry(self.backend.as_ref(), &request, self.settings.retry).await {
                Ok(next) => {
                    text.push_str(&next.content);
                    truncated = next.is_truncated();
                }
                Err(e) => {
                    tracing::warn!(chunk = chunk.index + 1, "continuation failed, keeping partial reply: {}", e);
                    return Ok(text);
                }
            }
        }

        if truncated {
            tracing::warn!(
                chunk = chunk.index + 1,
                continuations,
                "reply still truncated after the continuation limit"
            );
        }
        Ok(text)
    }

    /// Chunk `files` and run every chunk through the model.
    pub async fn analyze(&self, files: &FileSet) -> AnalysisOutcome {
        let run_id = Uuid::new_v4();
        self.run(files)
            .instrument(tracing::info_span!("analysis", run = %run_id))
            .await
    }

    async fn run(&self, files: &FileSet) -> AnalysisOutcome {
        let started = Instant::now();
        let chunks = chunk_files(
            files,
            self.settings.max_chunk_chars,
            self.settings.max_files_per_chunk,
        );

        let total_chars: usize = chunks.iter().map(Chunk::char_len).sum();
        let mut stats = AnalysisStats {
            total_files: files.len(),
            chunk_count: chunks.len(),
            estimated_tokens: total_chars / CHARS_PER_TOKEN,
            ..Default::default()
        };

        if chunks.is_empty() {
            tracing::error!("{}", AnalysisError::NoData);
            stats.duration_ms = elapsed_ms(started);
            return AnalysisOutcome {
                success: false,
                result: String::new(),
                error: Some(AnalysisError::NoData.to_string()),
                stats,
            };
        }

        if let Some(limit) = self.settings.context_limit {
            let largest = chunks.iter().map(Chunk::char_len).max().unwrap_or(0) / CHARS_PER_TOKEN;
            if largest > limit {
                tracing::warn!(
                    estimated_tokens = largest,
                    limit,
                    model = %self.settings.model,
                    "largest chunk exceeds the model context window; the request may fail"
                );
            }
        }

        tracing::info!(
            files = files.len(),
            chunks = chunks.len(),
            estimated_tokens = stats.estimated_tokens,
            "starting analysis"
        );

        let mut result = String::new();
        let mut last_error: Option<String> = None;

        for chunk in &chunks {
            tracing::info!(
                chunk = chunk.index + 1,
                total = chunk.total,
                files = chunk.paths.len(),
                chars = chunk.char_len(),
                "submitting chunk"
            );
            match self.submit(chunk).await {
                Ok(text) => {
                    stats.successful_chunks += 1;
                    result = text;
                }
                Err(e) => {
                    tracing::error!(chunk = chunk.index + 1, "chunk failed: {}", e);
                    stats.failed_chunks.push(chunk.index + 1);
                    last_error = Some(e.to_string());
                }
            }
        }

        let success = stats.failed_chunks.is_empty() || !result.is_empty();

        stats.duration_ms = elapsed_ms(started);
        stats.result_length = result.chars().count();
        stats.word_count = result.split_whitespace().count();

        if !stats.failed_chunks.is_empty() {
            tracing::warn!(failed = ?stats.failed_chunks, "analysis finished with failed chunks");
        }
        tracing::info!(
            success,
            duration_ms = stats.duration_ms,
            result_length = stats.result_length,
            "analysis finished"
        );

        AnalysisOutcome {
            success,
            result,
            error: if success { None } else { last_error },
            stats,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AttemptOutcome, ChatReply};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend that answers by inspecting the user message.
    struct FnBackend<F> {
        respond: F,
        calls: Mutex<Vec<String>>,
    }

    impl<F> FnBackend<F>
    where
        F: Fn(&str) -> AttemptOutcome + Send + Sync,
    {
        fn new(respond: F) -> Arc<Self> {
            Arc::new(Self {
                respond,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl<F> ChatBackend for FnBackend<F>
    where
        F: Fn(&str) -> AttemptOutcome + Send + Sync,
    {
        async fn attempt(&self, request: &ChatRequest) -> AttemptOutcome {
            let user = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.calls.lock().unwrap().push(user.clone());
            (self.respond)(&user)
        }
    }

    fn settings(max_chunk_chars: usize, max_files: usize) -> AnalysisSettings {
        AnalysisSettings {
            model: "test-model".into(),
            temperature: 0.7,
            max_tokens: 100,
            system_prompt: "system".into(),
            max_chunk_chars,
            max_files_per_chunk: max_files,
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::ZERO,
            },
            context_limit: None,
            max_continuations: 10,
        }
    }

    fn ok(text: &str) -> AttemptOutcome {
        AttemptOutcome::Ok(ChatReply::complete(text))
    }

    fn cut_off(text: &str) -> AttemptOutcome {
        AttemptOutcome::Ok(ChatReply {
            content: text.to_string(),
            finish_reason: Some("length".to_string()),
        })
    }

    /// Three files of distinct sizes, one per chunk.
    fn three_chunk_files() -> FileSet {
        [
            ("one.json", "1".to_string()),
            ("two.json", "2".repeat(2)),
            ("three.json", "3".repeat(3)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn notes_describe_position() {
        assert!(chunk_note(0, 1).is_none());
        assert!(chunk_note(0, 3).unwrap().contains("structure"));
        assert!(chunk_note(1, 3).unwrap().contains("Continue analyzing"));
        assert!(chunk_note(2, 3).unwrap().contains("complete final output"));
    }

    #[test]
    fn request_embeds_template_note_and_data() {
        let backend = FnBackend::new(|_| ok(""));
        let analyzer = Analyzer::new(backend, settings(100, 10), "TEMPLATE");
        let chunk = Chunk {
            index: 1,
            total: 3,
            paths: vec!["a.json".into()],
            text: "DATA".into(),
        };
        let request = analyzer.build_request(&chunk);
        assert_eq!(request.model, "test-model");
        assert_eq!(request.messages[0].role, "system");
        let user = &request.messages[1].content;
        assert!(user.starts_with("TEMPLATE"));
        assert!(user.contains("part 2 of 3"));
        assert!(user.ends_with("Here is the data:\n\nDATA"));
    }

    #[tokio::test]
    async fn single_chunk_result_is_returned() {
        let backend = FnBackend::new(|_| ok("a report of five words"));
        let analyzer = Analyzer::new(backend.clone(), settings(10_000, 10), "T");
        let files: FileSet = [("a.json", "{}")].into_iter().collect();

        let outcome = analyzer.analyze(&files).await;
        assert!(outcome.success);
        assert_eq!(outcome.result, "a report of five words");
        assert_eq!(outcome.stats.chunk_count, 1);
        assert_eq!(outcome.stats.word_count, 5);
        assert_eq!(outcome.stats.result_length, outcome.result.len());
        assert!(outcome.error.is_none());
        assert!(!backend.calls.lock().unwrap()[0].contains("NOTE:"));
    }

    #[tokio::test]
    async fn middle_chunk_failure_keeps_last_output() {
        let backend = FnBackend::new(|user: &str| {
            if user.contains("### FILE: two.json") {
                AttemptOutcome::Retryable(RemoteError::Status {
                    status: 503,
                    body: "overloaded".into(),
                })
            } else if user.contains("### FILE: three.json") {
                ok("chunk three output")
            } else {
                ok("chunk one output")
            }
        });
        let analyzer = Analyzer::new(backend.clone(), settings(25, 10), "T");

        let outcome = analyzer.analyze(&three_chunk_files()).await;
        assert_eq!(outcome.stats.chunk_count, 3);
        assert!(outcome.success);
        assert_eq!(outcome.stats.failed_chunks, vec![2]);
        assert_eq!(outcome.stats.successful_chunks, 2);
        assert_eq!(outcome.result, "chunk three output");
        // 1 + 4 attempts for chunk two + 1
        assert_eq!(backend.call_count(), 6);
    }

    #[tokio::test]
    async fn last_chunk_failure_keeps_earlier_output() {
        let backend = FnBackend::new(|user: &str| {
            if user.contains("### FILE: three.json") {
                AttemptOutcome::Retryable(RemoteError::Transport("connection reset".into()))
            } else {
                ok(&format!("output {}", user.len()))
            }
        });
        let analyzer = Analyzer::new(backend, settings(25, 10), "T");

        let outcome = analyzer.analyze(&three_chunk_files()).await;
        assert!(outcome.success);
        assert_eq!(outcome.stats.failed_chunks, vec![3]);
        assert!(outcome.result.starts_with("output"));
    }

    #[tokio::test]
    async fn all_chunks_failing_is_unsuccessful() {
        let backend = FnBackend::new(|_| {
            AttemptOutcome::Retryable(RemoteError::MalformedResponse("empty choices array".into()))
        });
        let analyzer = Analyzer::new(backend, settings(25, 10), "T");

        let outcome = analyzer.analyze(&three_chunk_files()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.stats.failed_chunks, vec![1, 2, 3]);
        assert!(outcome.result.is_empty());
        assert!(outcome.error.unwrap().contains("empty choices array"));
    }

    #[tokio::test]
    async fn no_files_is_no_data_without_network() {
        let backend = FnBackend::new(|_| ok("unused"));
        let analyzer = Analyzer::new(backend.clone(), settings(100, 10), "T");

        let outcome = analyzer.analyze(&FileSet::new()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no data to analyze"));
        assert_eq!(outcome.stats.chunk_count, 0);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn chunks_are_submitted_in_order() {
        let backend = FnBackend::new(|_| ok("ok"));
        let analyzer = Analyzer::new(backend.clone(), settings(25, 10), "T");
        analyzer.analyze(&three_chunk_files()).await;

        let calls = backend.calls.lock().unwrap();
        assert!(calls[0].contains("part 1 of 3"));
        assert!(calls[1].contains("part 2 of 3"));
        assert!(calls[2].contains("final part (3 of 3)"));
    }

    #[tokio::test]
    async fn truncated_reply_is_continued_and_concatenated() {
        let backend = FnBackend::new(|user: &str| {
            if user.starts_with("Continue from where you left off") {
                assert!(user.contains("'Interests: hik'"));
                ok("ing and climbing.")
            } else {
                cut_off("Interests: hik")
            }
        });
        let analyzer = Analyzer::new(backend.clone(), settings(10_000, 10), "T");
        let files: FileSet = [("a.json", "{}")].into_iter().collect();

        let outcome = analyzer.analyze(&files).await;
        assert!(outcome.success);
        assert_eq!(outcome.result, "Interests: hiking and climbing.");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn continuation_request_carries_text_so_far() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        struct Recording {
            seen: Arc<Mutex<Vec<ChatRequest>>>,
        }
        #[async_trait]
        impl ChatBackend for Recording {
            async fn attempt(&self, request: &ChatRequest) -> AttemptOutcome {
                let mut seen = self.seen.lock().unwrap();
                seen.push(request.clone());
                if seen.len() < 3 {
                    cut_off("part ")
                } else {
                    ok("end")
                }
            }
        }
        let analyzer = Analyzer::new(Arc::new(Recording { seen: seen.clone() }), settings(10_000, 10), "T");
        let chunk = Chunk {
            index: 0,
            total: 1,
            paths: vec!["a.json".into()],
            text: "DATA".into(),
        };

        assert_eq!(analyzer.submit(&chunk).await.unwrap(), "part part end");

        let seen = seen.lock().unwrap();
        let last = &seen[2];
        let roles: Vec<&str> = last.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(last.messages[2].content, "part part ");
    }

    #[tokio::test]
    async fn continuations_stop_at_limit() {
        let backend = FnBackend::new(|_| cut_off("x"));
        let mut settings = settings(10_000, 10);
        settings.max_continuations = 2;
        let analyzer = Analyzer::new(backend.clone(), settings, "T");
        let files: FileSet = [("a.json", "{}")].into_iter().collect();

        let outcome = analyzer.analyze(&files).await;
        assert_eq!(outcome.result, "xxx");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn failed_continuation_keeps_partial_text() {
        let backend = FnBackend::new(|user: &str| {
            if user.starts_with("Continue") {
                AttemptOutcome::Terminal(RemoteError::Transport("gone".into()))
            } else {
                cut_off("half a report")
            }
        });
        let analyzer = Analyzer::new(backend, settings(10_000, 10), "T");
        let files: FileSet = [("a.json", "{}")].into_iter().collect();

        let outcome = analyzer.analyze(&files).await;
        assert!(outcome.success);
        assert!(outcome.stats.failed_chunks.is_empty());
        assert_eq!(outcome.result, "half a report");
    }

    #[test]
    fn continuation_prompt_quotes_last_hundred_chars() {
        let text = format!("{}{}", "a".repeat(50), "é".repeat(100));
        let prompt = continuation_prompt(&text);
        assert!(prompt.ends_with(&format!("ended with: '{}'.", "é".repeat(100))));
        assert!(continuation_prompt("short").ends_with("ended with: 'short'."));
    }
}
