//! Minimal Anthropic Messages API client shared by the summarizer and the
//! insight extractor.

use std::time::Duration;

use research_shared::{AppConfig, LlmConfig, ResearchError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("research-pipeline/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

/// One-shot, single-user-message completion client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

impl LlmClient {
    pub fn new(api_key: Option<String>, llm: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(llm.request_timeout_secs))
            .build()
            .map_err(|e| ResearchError::Network(format!("failed to build LLM client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            api_key_env: llm.api_key_env.clone(),
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            endpoint: format!("{}/v1/messages", llm.base_url.trim_end_matches('/')),
        })
    }

    /// Client configured from `[llm]`, with the key read from its env var.
    pub fn from_settings(settings: &AppConfig) -> Result<Self> {
        Self::new(settings.llm_api_key(), &settings.llm)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Default completion budget from settings.
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `prompt` as a single user message and return the text blocks
    /// of the reply, concatenated.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ResearchError::Llm(format!("API key not configured (set {})", self.api_key_env))
        })?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, max_tokens, prompt_len = prompt.len(), "sending LLM request");

        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ResearchError::Llm(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ResearchError::Llm(format!(
                "API returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| ResearchError::Llm(format!("invalid response body: {e}")))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(ResearchError::Llm("response contained no text".into()));
        }
        Ok(text)
    }
}
