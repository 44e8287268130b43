//! `dprof analyze`: run the full pipeline and persist the report.
//!
//! The markdown report goes to `--output` (or stdout with `--stdout`); the
//! run summary is written to stderr so stdout stays usable in pipes. With
//! `--json` the whole [`AnalysisOutcome`] is printed instead.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::analyze::{AnalysisSettings, Analyzer};
use crate::config::Config;
use crate::inspect::prepare;
use crate::llm::HttpChatBackend;
use crate::models::AnalysisOutcome;
use crate::prompt::PromptStore;

/// Terms whose presence suggests the model finished its report.
const COMPLETION_MARKERS: &[&str] = &["conclusion", "summary", "overall"];

#[derive(Debug, Clone)]
pub struct AnalyzeArgs {
    pub input: PathBuf,
    pub profile: Option<String>,
    pub prompt: Option<String>,
    pub output: PathBuf,
    pub stdout: bool,
    pub json: bool,
}

/// Heuristic check that a report reached its closing section.
pub fn looks_complete(report: &str) -> bool {
    let lower = report.to_lowercase();
    COMPLETION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Run extraction, selection, and analysis. Returns whether the run
/// succeeded.
pub async fn run_analyze(config: &Config, args: &AnalyzeArgs) -> Result<bool> {
    let selection = prepare(config, &args.input, args.profile.as_deref())?;

    let prompts = PromptStore::new(&config.prompts.dir).load();
    let prompt_name = args.prompt.as_deref().unwrap_or(&config.prompts.name);
    let template = prompts.resolve(prompt_name);

    let backend = HttpChatBackend::from_config(&config.model)
        .context("Failed to create model client")?;
    let analyzer = Analyzer::new(
        Arc::new(backend),
        AnalysisSettings::from_config(config),
        template,
    );

    let outcome = analyzer.analyze(&selection.selected_files).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.success {
        if args.stdout {
            println!("{}", outcome.result);
        } else {
            std::fs::write(&args.output, &outcome.result)
                .with_context(|| format!("Failed to write report: {}", args.output.display()))?;
        }
    }

    print_summary(&outcome, (!args.stdout && !args.json).then_some(&args.output));

    Ok(outcome.success)
}

fn print_summary(outcome: &AnalysisOutcome, saved_to: Option<&PathBuf>) {
    let stats = &outcome.stats;
    eprintln!();
    eprintln!("--- Analysis ---");
    eprintln!("finished:     {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    eprintln!("files:        {}", stats.total_files);
    eprintln!(
        "chunks:       {} ({} succeeded)",
        stats.chunk_count, stats.successful_chunks
    );
    if !stats.failed_chunks.is_empty() {
        let failed: Vec<String> = stats.failed_chunks.iter().map(|i| i.to_string()).collect();
        eprintln!("failed:       {}", failed.join(", "));
    }
    eprintln!("est. tokens:  {}", stats.estimated_tokens);
    eprintln!("duration:     {:.2}s", stats.duration_ms as f64 / 1000.0);

    if !outcome.success {
        eprintln!(
            "status:       FAILED: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }

    eprintln!("length:       {} characters", stats.result_length);
    eprintln!("words:        {}", stats.word_count);
    if let Some(path) = saved_to {
        eprintln!("saved to:     {}", path.display());
    }
    if !looks_complete(&outcome.result) {
        eprintln!("warning:      report may be incomplete (no conclusion or summary found)");
    }
}
