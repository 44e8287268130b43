//! TOML configuration parsing.
//!
//! Every tunable of the pipeline lives in a single file passed with
//! `--config`. All sections are optional; missing fields fall back to the
//! defaults below so that an empty file is a valid configuration.
//!
//! ```toml
//! [model]
//! endpoint = "http://127.0.0.1:8080/api/chat"
//! model = "google/gemini-2.5-pro"
//!
//! [chunking]
//! max_chunk_chars = 400000
//! max_files_per_chunk = 50
//!
//! [selection]
//! config_path = "./config/selection.json"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub selection: SelectionSettings,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Remote chat-completion endpoint and sampling parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Where chat requests are POSTed. Usually the local proxy.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// How many times a reply cut off by `max_tokens` is asked to continue.
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Environment variable holding a bearer key to send directly.
    /// Leave unset when `endpoint` is the proxy, which injects its own key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Overrides the built-in context window table for this model.
    #[serde(default)]
    pub context_limit: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_continuations: default_max_continuations(),
            timeout_secs: default_timeout_secs(),
            system_prompt: default_system_prompt(),
            api_key_env: None,
            context_limit: None,
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/api/chat".to_string()
}
fn default_model() -> String {
    "google/gemini-2.5-pro".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_max_continuations() -> u32 {
    10
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_system_prompt() -> String {
    "You are a professional analyst of personal data exports.".to_string()
}

/// Known context windows (tokens), used to warn before sending oversized runs.
const MODEL_CONTEXT_LIMITS: &[(&str, usize)] = &[
    ("google/gemini-pro", 32_768),
    ("google/gemini-2.5-flash", 128_000),
    ("google/gemini-2.5-pro", 1_048_576),
];

impl ModelConfig {
    pub fn context_limit(&self) -> Option<usize> {
        self.context_limit.or_else(|| {
            MODEL_CONTEXT_LIMITS
                .iter()
                .find(|(name, _)| *name == self.model)
                .map(|(_, limit)| *limit)
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_max_files_per_chunk")]
    pub max_files_per_chunk: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            max_files_per_chunk: default_max_files_per_chunk(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    400_000
}
fn default_max_files_per_chunk() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionSettings {
    #[serde(default = "default_selection_path")]
    pub config_path: PathBuf,
    #[serde(default)]
    pub default_profile: Option<String>,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            config_path: default_selection_path(),
            default_profile: None,
        }
    }
}

fn default_selection_path() -> PathBuf {
    PathBuf::from("./config/selection.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_prompts_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prompt_name")]
    pub name: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
            name: default_prompt_name(),
        }
    }
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("./prompts")
}
fn default_prompt_name() -> String {
    "profiler".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
    /// Follow symbolic links inside an unpacked export directory.
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            max_entry_bytes: default_max_entry_bytes(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string(), "**/*.html".to_string()]
}
fn default_max_entry_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_proxy_key_env")]
    pub api_key_env: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upstream_url: default_upstream_url(),
            api_key_env: default_proxy_key_env(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_upstream_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_proxy_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

impl Config {
    /// Configuration used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Load and validate the configuration at `path`.
///
/// A missing file yields [`Config::minimal`]; a file that exists but cannot
/// be parsed or fails validation is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::minimal());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_chars == 0 {
        bail!("chunking.max_chunk_chars must be > 0");
    }

    if config.chunking.max_files_per_chunk == 0 {
        bail!("chunking.max_files_per_chunk must be > 0");
    }

    if !(0.0..=2.0).contains(&config.model.temperature) {
        bail!("model.temperature must be in [0.0, 2.0]");
    }

    if config.model.max_tokens == 0 {
        bail!("model.max_tokens must be > 0");
    }

    if config.extract.include_globs.is_empty() {
        bail!("extract.include_globs must not be empty");
    }

    Ok(())
}
