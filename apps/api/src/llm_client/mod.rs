/// Provider clients: the single point of entry for every language-model call.
///
/// ARCHITECTURAL RULE: No other module may call a provider API directly.
/// Each backend implements `ProviderClient`; `GenerationService` picks one
/// through the policy table and the `ProviderRegistry`.
///
/// Clients make exactly one HTTP call per `complete`. Retries belong to the
/// job runner so that the attempt budget is visible in one place.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::artifact::ProviderKind;

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod prompts;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider rate limited the request: {message}")]
    RateLimited { message: String },

    #[error("provider server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("provider rejected the request (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider returned empty content")]
    EmptyContent,
}

impl ProviderError {
    /// Timeouts, rate limits, 5xx, transport failures and unusable bodies are
    /// expected to clear on a later attempt. A 4xx rejection is not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::Api { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Http(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Provider-neutral completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Opaque end-user id forwarded for provider-side abuse tracking.
    pub user: Option<String>,
}

impl CompletionRequest {
    /// All system messages joined, for providers that take the system prompt out of band.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// One external text-generation backend.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Sends one request and returns normalized, non-empty text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// The configured provider backends, keyed by kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(client.kind(), client);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.clients.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

/// Builds the shared reqwest client with the fixed per-call timeout.
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Maps the HTTP status to a `ProviderError` and decodes a successful body.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    provider: ProviderKind,
    response: Response,
) -> Result<T, ProviderError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // Every supported provider nests the message under `error.message`
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        warn!("{provider} API returned {status}: {message}");

        return Err(if status.as_u16() == 429 {
            ProviderError::RateLimited { message }
        } else if status.is_server_error() {
            ProviderError::Server {
                status: status.as_u16(),
                message,
            }
        } else {
            ProviderError::Api {
                status: status.as_u16(),
                message,
            }
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Trims provider text; blank output is a failure, never an empty success.
pub(crate) fn normalize_text(text: Option<&str>) -> Result<String, ProviderError> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(ProviderError::EmptyContent),
    }
}
