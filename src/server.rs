//! Credential-injecting proxy and analysis HTTP server.
//!
//! Browser or CLI clients talk to this server instead of the model API so
//! the API key never leaves the machine running it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Forward a chat-completion body upstream with the bearer key |
//! | `POST` | `/api/analyze` | Select, chunk, and analyze posted files server-side |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/api/chat` relays the upstream status code, `Content-Type` and body
//! verbatim. Any other method on it is answered with `405`.
//!
//! # Error Contract
//!
//! Errors raised by this server (not relayed upstream errors) use:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "files must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `missing_credential` (500),
//! `bad_gateway` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends on
//! other ports can call the proxy.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::analyze::{AnalysisSettings, Analyzer};
use crate::config::Config;
use crate::llm::HttpChatBackend;
use crate::models::FileSet;
use crate::prompt::{PromptSet, PromptStore};
use crate::selection::select_with_config_file;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    client: reqwest::Client,
    /// Bearer key for the upstream API; `None` when the variable is unset.
    api_key: Option<Arc<str>>,
    prompts: Arc<PromptSet>,
}

/// Starts the proxy server.
///
/// Binds to `[proxy].bind`, reads the upstream key from the environment
/// variable named by `[proxy].api_key_env`, and serves until the process is
/// terminated. A missing key is not fatal at startup; requests that need it
/// fail with `missing_credential`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let api_key = std::env::var(&config.proxy.api_key_env).ok();
    if api_key.is_none() {
        tracing::warn!(
            var = %config.proxy.api_key_env,
            "upstream API key not set; proxied requests will be rejected"
        );
    }

    let prompts = PromptStore::new(&config.prompts.dir).load();
    let app = build_router(Arc::new(config.clone()), prompts, api_key)?;

    let listener = tokio::net::TcpListener::bind(&config.proxy.bind).await?;
    tracing::info!(
        bind = %config.proxy.bind,
        upstream = %config.proxy.upstream_url,
        "proxy listening"
    );
    println!("Proxy listening on http://{}", config.proxy.bind);
    println!("  POST /api/chat     -> {}", config.proxy.upstream_url);
    println!("  POST /api/analyze");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router without binding. Used by [`run_server`] and tests.
pub fn build_router(
    config: Arc<Config>,
    prompts: PromptSet,
    api_key: Option<String>,
) -> anyhow::Result<Router> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.model.timeout_secs))
        .build()?;

    let state = AppState {
        config,
        client,
        api_key: api_key.map(Arc::from),
        prompts: Arc::new(prompts),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/analyze", post(handle_analyze))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn missing_credential(var: &str) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "missing_credential",
        message: format!("server API key not configured ({} is not set)", var),
    }
}

fn bad_gateway(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "bad_gateway",
        message: message.into(),
    }
}

impl AppState {
    fn require_key(&self) -> Result<&str, AppError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| missing_credential(&self.config.proxy.api_key_env))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

/// Forward the body upstream with the server's bearer key and relay the
/// response status and body unchanged.
async fn handle_chat(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let key = state.require_key()?;

    let upstream = state
        .client
        .post(&state.config.proxy.upstream_url)
        .header(header::AUTHORIZATION, format!("Bearer {}", key))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!("upstream request failed: {}", e);
            bad_gateway(format!("upstream request failed: {}", e))
        })?;

    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| bad_gateway(format!("failed to read upstream response: {}", e)))?;

    tracing::debug!(status = status.as_u16(), bytes = bytes.len(), "relayed upstream response");

    Ok((status, [(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

// ============ POST /api/analyze ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    files: BTreeMap<String, String>,
}

/// Run selection and analysis over posted files against the upstream API.
///
/// Returns the analysis outcome with `200` on success and `502` when no
/// chunk produced output.
async fn handle_analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    if request.files.is_empty() {
        return Err(bad_request("files must not be empty"));
    }
    let key = state.require_key()?.to_string();

    let files: FileSet = request.files.into_iter().collect();
    let profile = request
        .profile
        .or_else(|| state.config.selection.default_profile.clone())
        .unwrap_or_default();

    let selection = select_with_config_file(&profile, &files, &state.config.selection.config_path);

    let backend = HttpChatBackend::with_client(
        state.client.clone(),
        state.config.proxy.upstream_url.clone(),
        Some(key),
    );
    let template = state.prompts.resolve(&state.config.prompts.name);
    let analyzer = Analyzer::new(
        Arc::new(backend),
        AnalysisSettings::from_config(&state.config),
        template,
    );

    let outcome = analyzer.analyze(&selection.selected_files).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)).into_response())
}
