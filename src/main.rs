//! # Data Profiler CLI (`dprof`)
//!
//! ## Usage
//!
//! ```bash
//! dprof --config ./config/dprof.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dprof extract <input>` | List the text entries extracted from an export |
//! | `dprof profiles` | List the configured selection profiles |
//! | `dprof select <input>` | Show which files a profile selects |
//! | `dprof chunks <input>` | Show how the selection would be chunked |
//! | `dprof analyze <input>` | Run the analysis and write the report |
//! | `dprof serve` | Start the credential-injecting proxy |
//!
//! `<input>` is a zip export or a directory the export was unpacked into.

use clap::{Parser, Subcommand};
use data_profiler::{config, inspect, report, server};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Data Profiler: select, chunk, and analyze personal data exports with a
/// remote language model.
#[derive(Parser)]
#[command(
    name = "dprof",
    about = "Select, chunk, and analyze personal data exports with a remote language model",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/dprof.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/dprof.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the text entries extracted from an export.
    Extract {
        /// Zip archive or unpacked export directory.
        input: PathBuf,
    },

    /// List the selection profiles in the selection config.
    Profiles,

    /// Show which files a selection profile picks.
    Select {
        input: PathBuf,

        /// Selection profile name. Falls back to `[selection].default_profile`.
        #[arg(long)]
        profile: Option<String>,
    },

    /// Show the chunk plan for a selection without calling the model.
    Chunks {
        input: PathBuf,

        #[arg(long)]
        profile: Option<String>,

        /// Override `[chunking].max_chunk_chars`.
        #[arg(long)]
        max_chunk_chars: Option<usize>,

        /// Override `[chunking].max_files_per_chunk`.
        #[arg(long)]
        max_files: Option<usize>,
    },

    /// Analyze an export and write the markdown report.
    Analyze {
        input: PathBuf,

        #[arg(long)]
        profile: Option<String>,

        /// Prompt name in the prompt directory. Defaults to `[prompts].name`.
        #[arg(long)]
        prompt: Option<String>,

        /// Where to write the report.
        #[arg(long, short, default_value = "profile_result.md")]
        output: PathBuf,

        /// Print the report to stdout instead of writing a file.
        #[arg(long)]
        stdout: bool,

        /// Print the full outcome (report and statistics) as JSON.
        #[arg(long)]
        json: bool,

        /// Override `[model].model`.
        #[arg(long)]
        model: Option<String>,

        /// Override `[model].temperature`.
        #[arg(long)]
        temperature: Option<f64>,
    },

    /// Start the proxy server.
    ///
    /// Binds to `[proxy].bind` and forwards `POST /api/chat` to
    /// `[proxy].upstream_url` with the key from `[proxy].api_key_env`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Extract { input } => {
            inspect::run_extract(&cfg, &input)?;
        }
        Commands::Profiles => {
            inspect::run_profiles(&cfg)?;
        }
        Commands::Select { input, profile } => {
            inspect::run_select(&cfg, &input, profile.as_deref())?;
        }
        Commands::Chunks {
            input,
            profile,
            max_chunk_chars,
            max_files,
        } => {
            if let Some(n) = max_chunk_chars {
                cfg.chunking.max_chunk_chars = n.max(1);
            }
            if let Some(n) = max_files {
                cfg.chunking.max_files_per_chunk = n.max(1);
            }
            inspect::run_chunks(&cfg, &input, profile.as_deref())?;
        }
        Commands::Analyze {
            input,
            profile,
            prompt,
            output,
            stdout,
            json,
            model,
            temperature,
        } => {
            if let Some(m) = model {
                cfg.model.model = m;
            }
            if let Some(t) = temperature {
                anyhow::ensure!((0.0..=2.0).contains(&t), "--temperature must be in [0.0, 2.0]");
                cfg.model.temperature = t;
            }
            let args = report::AnalyzeArgs {
                input,
                profile,
                prompt,
                output,
                stdout,
                json,
            };
            if !report::run_analyze(&cfg, &args).await? {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
