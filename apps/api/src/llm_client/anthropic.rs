use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    decode_response, http_client, normalize_text, CompletionRequest, ProviderClient,
    ProviderError, Role,
};
use crate::models::artifact::ProviderKind;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    /// Text of the first `text` content block.
    pub(crate) fn text(&self) -> Result<String, ProviderError> {
        normalize_text(
            self.content
                .iter()
                .find(|b| b.block_type == "text")
                .and_then(|b| b.text.as_deref()),
        )
    }
}

/// Provider B. Messages API; the system prompt is a top-level field.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
        })
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_prompt(),
            messages: request
                .conversation()
                .map(|m| AnthropicMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let parsed: MessagesResponse = decode_response(self.kind(), response).await?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "Anthropic call succeeded: model={}, input_tokens={}, output_tokens={}",
                request.model, usage.input_tokens, usage.output_tokens
            );
        }

        parsed.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_skips_non_text_blocks() {
        let json = r#"{
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Dear Hiring Manager,"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 4}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text().unwrap(), "Dear Hiring Manager,");
    }

    #[test]
    fn test_no_text_block_is_empty_content() {
        let parsed: MessagesResponse =
            serde_json::from_str(r#"{"content": [{"type": "text", "text": "\n"}]}"#).unwrap();
        assert!(matches!(parsed.text(), Err(ProviderError::EmptyContent)));
    }
}
