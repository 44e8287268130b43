//! Dry-run commands: look at what an export contains, what a profile
//! selects, and how the selection would be chunked, without calling the
//! model.

use anyhow::{Context, Result};
use std::path::Path;

use crate::chunk::chunk_files;
use crate::config::Config;
use crate::extract::{extract_path, ExtractOptions};
use crate::models::{FileSet, SelectionResult};
use crate::selection::{select_with_config_file, SelectionConfig};

/// Profile to use: the explicit one, else `[selection].default_profile`.
/// An empty name never matches, so selection fails open to all files.
pub fn resolve_profile(config: &Config, profile: Option<&str>) -> String {
    profile
        .map(str::to_string)
        .or_else(|| config.selection.default_profile.clone())
        .unwrap_or_default()
}

pub fn load_files(config: &Config, input: &Path) -> Result<FileSet> {
    let opts = ExtractOptions::from_config(&config.extract)?;
    extract_path(input, &opts).with_context(|| format!("Failed to extract {}", input.display()))
}

/// Extract `input` and apply the selection profile.
pub fn prepare(config: &Config, input: &Path, profile: Option<&str>) -> Result<SelectionResult> {
    let files = load_files(config, input)?;
    let profile = resolve_profile(config, profile);
    Ok(select_with_config_file(
        &profile,
        &files,
        &config.selection.config_path,
    ))
}

/// `dprof extract <input>`
pub fn run_extract(config: &Config, input: &Path) -> Result<()> {
    let files = load_files(config, input)?;

    println!("{:>10}  PATH", "CHARS");
    for file in &files {
        println!("{:>10}  {}", file.content.chars().count(), file.path);
    }
    println!();
    println!("{} files, {} characters", files.len(), files.total_chars());
    Ok(())
}

/// `dprof profiles`
pub fn run_profiles(config: &Config) -> Result<()> {
    let path = &config.selection.config_path;
    let selection = match SelectionConfig::load(path) {
        Ok(s) => s,
        Err(e) => {
            println!("No selection profiles available ({:#}).", e);
            println!("All extracted files will be analyzed.");
            return Ok(());
        }
    };

    println!("{:<24} PATTERNS", "PROFILE");
    for profile in &selection.profiles {
        let marker = if config.selection.default_profile.as_deref() == Some(profile.name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("{:<24} {}{}", profile.name, profile.data.len(), marker);
    }
    Ok(())
}

/// `dprof select <input> --profile <name>`
pub fn run_select(config: &Config, input: &Path, profile: Option<&str>) -> Result<()> {
    let result = prepare(config, input, profile)?;
    print_selection(&result);
    for path in &result.used_paths {
        println!("  {}", path);
    }
    Ok(())
}

/// `dprof chunks <input> --profile <name>`
pub fn run_chunks(config: &Config, input: &Path, profile: Option<&str>) -> Result<()> {
    let result = prepare(config, input, profile)?;
    print_selection(&result);

    let chunks = chunk_files(
        &result.selected_files,
        config.chunking.max_chunk_chars,
        config.chunking.max_files_per_chunk,
    );
    println!();
    println!(
        "{} chunks (max {} chars, max {} files each)",
        chunks.len(),
        config.chunking.max_chunk_chars,
        config.chunking.max_files_per_chunk
    );
    println!("{:>6} {:>6} {:>10}", "CHUNK", "FILES", "CHARS");
    for chunk in &chunks {
        let oversized = if chunk.char_len() > config.chunking.max_chunk_chars {
            "  (single oversized file)"
        } else {
            ""
        };
        println!(
            "{:>6} {:>6} {:>10}{}",
            chunk.index + 1,
            chunk.paths.len(),
            chunk.char_len(),
            oversized
        );
    }
    Ok(())
}

fn print_selection(result: &SelectionResult) {
    if result.config_found {
        println!(
            "selected {} of {} files",
            result.selected_count, result.total_file_count
        );
        if let Some(patterns) = &result.patterns {
            println!("patterns: {}", patterns.join(", "));
        }
    } else {
        println!(
            "no matching profile; using all {} files",
            result.total_file_count
        );
    }
}
