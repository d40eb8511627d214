//! Anthropic adapter (Messages API).
//!
//! Implements the `cb-core` completion port. Every failure is reported as
//! `Error::Completion` so the core can treat the provider as one failure kind.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cb_core::{
    domain::Role,
    errors::Error,
    model::{client::CompletionClient, types::CompletionRequest},
    Result,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_MAX_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct AnthropicClient {
    cfg: AnthropicConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(cfg: AnthropicConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent("cb-rust/0.1")
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self { cfg, http })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.cfg.base_url.trim_end_matches('/'))
    }
}

fn build_body<'a>(model: &'a str, req: &'a CompletionRequest) -> MessagesBody<'a> {
    MessagesBody {
        model,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        system: req.system.as_deref(),
        messages: req
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role,
                content: &m.content,
            })
            .collect(),
    }
}

/// Concatenated text blocks of a Messages API response.
fn extract_text(resp: MessagesResponse) -> Result<String> {
    let text = resp
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(Error::Completion(
            "anthropic response contained no text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn generate(&self, req: CompletionRequest) -> Result<String> {
        let body = build_body(&self.cfg.model, &req);

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.cfg.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Completion(format!("anthropic request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "anthropic request rejected");
            return Err(Error::Completion(format!(
                "anthropic request failed: {status} {}",
                body.chars().take(ERROR_BODY_MAX_CHARS).collect::<String>()
            )));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| Error::Completion(format!("anthropic json error: {e}")))?;

        extract_text(parsed)
    }
}
