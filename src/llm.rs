//! Chat-completion client with retry and exponential backoff.
//!
//! Each call to a [`ChatBackend`] is a single attempt that reports an
//! [`AttemptOutcome`]. [`submit_with_retry`] owns the policy: it retries
//! [`AttemptOutcome::Retryable`] results up to [`RetryPolicy::max_retries`]
//! times, sleeping `base_delay * 2^(k-1)` before retry `k`, and stops at
//! the first [`AttemptOutcome::Terminal`].
//!
//! # Wire format
//!
//! Requests follow the OpenAI chat-completions shape:
//!
//! ```json
//! { "model": "...", "messages": [{"role": "user", "content": "..."}],
//!   "temperature": 0.7, "max_tokens": 4000 }
//! ```
//!
//! Responses must carry `choices[0].message.content` as a string. Anything
//! else is a [`RemoteError::MalformedResponse`], which is retried like a
//! transport failure. `choices[0].finish_reason` is kept on the
//! [`ChatReply`] so callers can tell a finished reply from one cut off by
//! `max_tokens`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{ModelConfig, RetryConfig};

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Body of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Provider model identifier, e.g. `google/gemini-2.5-pro`.
    pub model: String,
    /// Conversation so far; the last message is the one being answered.
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    /// Upper bound on generated tokens for this reply.
    pub max_tokens: u32,
}

/// Text of the first choice plus why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub finish_reason: Option<String>,
}

impl ChatReply {
    /// A reply that finished normally (`"stop"`).
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// `true` when the model reported a finish reason other than `"stop"`,
    /// typically `"length"` once `max_tokens` is reached. A missing finish
    /// reason counts as finished.
    pub fn is_truncated(&self) -> bool {
        matches!(self.finish_reason.as_deref(), Some(reason) if reason != "stop")
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Errors talking to the chat-completion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response: connection, TLS, timeout.
    #[error("request failed: {0}")]
    Transport(String),
    /// The endpoint answered with a non-2xx status.
    #[error("model API error {status}: {body}")]
    Status { status: u16, body: String },
    /// A 2xx response whose body does not match the expected schema.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    /// Retries ran out (or a terminal error stopped them); `last` is the
    /// final underlying failure.
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<RemoteError> },
}

/// Result of one submission attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Ok(ChatReply),
    /// Worth trying again after a backoff.
    Retryable(RemoteError),
    /// Retrying cannot help; stop immediately.
    Terminal(RemoteError),
}

/// Extract the first choice from a response body.
pub fn parse_chat_response(body: &str) -> Result<ChatReply, RemoteError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RemoteError::MalformedResponse("empty choices array".to_string()))?;
    if let Some(reason) = &choice.finish_reason {
        tracing::debug!(finish_reason = %reason, "model response received");
    }
    Ok(ChatReply {
        content: choice.message.content,
        finish_reason: choice.finish_reason,
    })
}

/// One-shot transport for chat requests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn attempt(&self, request: &ChatRequest) -> AttemptOutcome;
}

/// Backend that POSTs to an HTTP endpoint (the proxy or the upstream API).
pub struct HttpChatBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpChatBackend {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint, api_key))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Build a backend from `[model]`, reading the optional key from the
    /// environment variable named by `api_key_env`.
    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        Self::new(
            config.endpoint.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn attempt(&self, request: &ChatRequest) -> AttemptOutcome {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) if e.is_builder() => {
                return AttemptOutcome::Terminal(RemoteError::Transport(e.to_string()))
            }
            Err(e) => return AttemptOutcome::Retryable(RemoteError::Transport(e.to_string())),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return AttemptOutcome::Retryable(RemoteError::Transport(e.to_string())),
        };

        if !status.is_success() {
            return AttemptOutcome::Retryable(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match parse_chat_response(&body) {
            Ok(reply) => AttemptOutcome::Ok(reply),
            Err(e) => AttemptOutcome::Retryable(e),
        }
    }
}

/// How often and how patiently a failed attempt is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `3` means up to four attempts.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each one after.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `k` (1-based): `base_delay * 2^(k-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Submit `request`, retrying per `policy`. Returns the model's reply or
/// [`RemoteError::Exhausted`] carrying the last failure.
pub async fn submit_with_retry(
    backend: &dyn ChatBackend,
    request: &ChatRequest,
    policy: RetryPolicy,
) -> Result<ChatReply, RemoteError> {
    let mut attempts = 0u32;
    loop {
        if attempts > 0 {
            let delay = policy.delay_for(attempts);
            tracing::debug!(retry = attempts, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::time::sleep(delay).await;
        }
        attempts += 1;

        let err = match backend.attempt(request).await {
            AttemptOutcome::Ok(reply) => return Ok(reply),
            AttemptOutcome::Terminal(e) => {
                return Err(RemoteError::Exhausted {
                    attempts,
                    last: Box::new(e),
                })
            }
            AttemptOutcome::Retryable(e) => e,
        };

        tracing::warn!(attempt = attempts, "chat request failed: {}", err);

        if attempts > policy.max_retries {
            return Err(RemoteError::Exhausted {
                attempts,
                last: Box::new(err),
            });
        }
    }
}
