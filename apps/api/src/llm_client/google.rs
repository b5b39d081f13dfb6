use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    decode_response, http_client, normalize_text, CompletionRequest, ProviderClient,
    ProviderError,
};
use crate::models::artifact::ProviderKind;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<OwnedPart>,
}

#[derive(Debug, Serialize)]
struct OwnedPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

impl GenerateContentResponse {
    /// `candidates[0].content.parts[0].text`
    pub(crate) fn text(&self) -> Result<String, ProviderError> {
        normalize_text(
            self.candidates
                .first()
                .and_then(|c| c.content.as_ref())
                .and_then(|c| c.parts.first())
                .and_then(|p| p.text.as_deref()),
        )
    }
}

/// Provider C. Gemini `generateContent`; assistant turns use the `model` role.
#[derive(Clone)]
pub struct GoogleClient {
    client: Client,
    api_key: String,
}

impl GoogleClient {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
        })
    }
}

#[async_trait]
impl ProviderClient for GoogleClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = GenerateContentRequest {
            contents: request
                .conversation()
                .map(|m| Content {
                    role: "user",
                    parts: vec![Part { text: &m.content }],
                })
                .collect(),
            system_instruction: request.system_prompt().map(|text| SystemInstruction {
                parts: vec![OwnedPart { text }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let url = format!("{GEMINI_API_BASE}/{}:generateContent", request.model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let parsed: GenerateContentResponse = decode_response(self.kind(), response).await?;

        if let Some(usage) = &parsed.usage_metadata {
            debug!(
                "Gemini call succeeded: model={}, prompt_tokens={:?}, candidate_tokens={:?}",
                request.model, usage.prompt_token_count, usage.candidates_token_count
            );
        }

        parsed.text()
    }
}
