//! # Data Profiler
//!
//! Select, chunk, and analyze personal data exports with a remote language
//! model.
//!
//! A data export is unpacked into text entries, a named selection profile
//! picks the entries relevant to the analysis, the selection is packed into
//! size-bounded chunks, and each chunk is sent with a prompt template to an
//! OpenAI-compatible chat-completion API. A small HTTP proxy holds the API
//! key so clients never see it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌─────────┐
//! │ Extract  │──▶│ Selection │──▶│  Chunk  │──▶│ Analyze  │──▶│  Proxy  │──▶ model API
//! │ zip/dir  │   │ (matcher) │   │         │   │ (retry)  │   │ (+key)  │
//! └──────────┘   └───────────┘   └─────────┘   └──────────┘   └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENROUTER_API_KEY=...
//! dprof serve                                  # start the proxy
//! dprof select export.zip --profile minimal    # preview the selection
//! dprof analyze export.zip --profile minimal   # write profile_result.md
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Zip/directory extraction |
//! | [`matcher`] | Path pattern matching |
//! | [`selection`] | Profile-driven file selection |
//! | [`chunk`] | File-boundary chunking |
//! | [`llm`] | Chat-completion client with retry |
//! | [`analyze`] | Multi-chunk analysis driver |
//! | [`prompt`] | Prompt template store |
//! | [`server`] | Proxy HTTP server |
//! | [`inspect`] | Dry-run CLI commands |
//! | [`report`] | Analysis CLI command |

pub mod analyze;
pub mod chunk;
pub mod config;
pub mod extract;
pub mod inspect;
pub mod llm;
pub mod matcher;
pub mod models;
pub mod prompt;
pub mod report;
pub mod selection;
pub mod server;
