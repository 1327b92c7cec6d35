//! Language-Model Orchestrator.
//!
//! The orchestrator drives a two-pass protocol (plan, then generate) against an Ollama chat
//! endpoint. Calls share one retry policy that never retries a missing model, and model output
//! is parsed through a single JSON extraction routine.

pub mod extract;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod retry;

pub use extract::{ExtractError, JsonShape, extract_json};
pub use orchestrator::{GroupOutcome, GroupState, Orchestrator, RawPair};
pub use plan::{PlanError, PlanResult, Takeaway, validate_plan};
pub use prompts::{PromptHashes, PromptSet};
pub use retry::{Attempted, RetryPolicy};

use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by language-model calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Configured model tag is unavailable; no retry can succeed.
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    /// Network failure or non-success status worth retrying.
    #[error("Transient model failure: {0}")]
    Transient(String),
    /// Response arrived but could not be used.
    #[error("Malformed model response: {0}")]
    InvalidResponse(String),
    /// HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl LlmError {
    /// Whether the error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LlmError::ModelNotFound(_) | LlmError::Client(_))
    }
}

/// Sampling options forwarded verbatim to the runtime and recorded in provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Maximum tokens to predict.
    pub num_predict: u32,
    /// Context window.
    pub num_ctx: u32,
}

impl From<&LlmConfig> for ModelOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            num_predict: config.num_predict,
            num_ctx: config.num_ctx,
        }
    }
}

/// One system + user exchange.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model tag.
    pub model: String,
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub user: String,
    /// Sampling options.
    pub options: ModelOptions,
}

/// Interface implemented by chat-style language-model backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one exchange and return the assistant text.
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// Ollama `/api/chat` client with streaming disabled.
pub struct OllamaChatClient {
    http: Client,
    base_url: String,
}

impl OllamaChatClient {
    /// Build a client for `base_url` with the given per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent("qacurator/llm")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Build a client from the `llm` configuration section.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_s.max(1)),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    #[serde(default)]
    done: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LlmClient for OllamaChatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "stream": false,
            "options": {
                "temperature": request.options.temperature,
                "top_p": request.options.top_p,
                "num_predict": request.options.num_predict,
                "num_ctx": request.options.num_ctx,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmError::Transient(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ModelNotFound(format!(
                "model {} unavailable at {}: {body}",
                request.model,
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transient(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            LlmError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if body.done == Some(false) {
            return Err(LlmError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        let content = body.message.map(|message| message.content).unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse(
                "Ollama response carried no message content".into(),
            ));
        }
        Ok(content)
    }
}
