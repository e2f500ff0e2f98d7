//! LLMProvider: the one interface the core consumes from an Anthropic-shaped
//! chat API. Mirrors the agency's `LLMProvider` trait (`agent/provider.rs`)
//! but drops the local-inference (candle) backend — the runtime only ever
//! talks to a remote, credentialed provider or a test double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { name: String, input: serde_json::Value },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

impl CompletionResponse {
    /// Concatenates every `Text` block — the shape most callers want.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolUse { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited (429)")]
    RateLimited,
    #[error("server error: {0}")]
    Server(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Transient per §4.4 — eligible for the LLM client's retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimited | ProviderError::Server(_))
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn messages_create(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;
}

/// Talks to any Anthropic-compatible `/v1/messages` endpoint over `reqwest`.
pub struct HttpLLMProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLLMProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LLMProvider for HttpLLMProvider {
    async fn messages_create(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            system: Option<&'a str>,
            messages: &'a [ChatMessage],
            max_tokens: u32,
            temperature: f32,
        }

        let body = Body {
            model: &request.model,
            system: request.system.as_deref(),
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status.as_u16() >= 500 {
            return Err(ProviderError::Server(status.as_u16()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Malformed(format!(
                "status {status}: {body}"
            )));
        }

        #[derive(Deserialize)]
        struct Wire {
            content: Vec<ContentBlock>,
            usage: Usage,
        }

        let wire: Wire = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(CompletionResponse {
            content: wire.content,
            usage: wire.usage,
        })
    }
}
