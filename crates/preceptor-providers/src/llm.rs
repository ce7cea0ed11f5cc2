//! OpenAI-compatible chat completion and embeddings client.
//!
//! Speaks `/v1/chat/completions` and `/v1/embeddings`, which covers Mistral,
//! OpenRouter, and other compatible endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use preceptor_core::config::Config;
use preceptor_core::error::{PreceptorError, Result};
use preceptor_core::types::Turn;

use crate::LanguageModel;

const MISTRAL_BASE_URL: &str = "https://api.mistral.ai";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";

pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    max_tokens: u32,
    temperature: Option<f64>,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let cfg = config.llm.clone().unwrap_or_default();
        let api_key = cfg
            .resolve_api_key()
            .ok_or_else(|| PreceptorError::Config("llm.api_key is not set".into()))?;

        let provider = cfg.provider.as_deref().unwrap_or("mistral");
        let (default_base, default_model) = match provider {
            "openrouter" => (OPENROUTER_BASE_URL, "mistralai/mistral-small"),
            _ => (MISTRAL_BASE_URL, "mistral-small-latest"),
        };

        Ok(Self {
            base_url: cfg
                .base_url
                .unwrap_or_else(|| default_base.into())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: cfg.model.unwrap_or_else(|| default_model.into()),
            embedding_model: cfg
                .embedding_model
                .unwrap_or_else(|| "mistral-embed".into()),
            max_tokens: cfg.max_tokens.unwrap_or(1024),
            temperature: cfg.temperature,
            timeout: Duration::from_secs(cfg.timeout_secs.unwrap_or(60)),
            client: reqwest::Client::new(),
        })
    }
}

/// Assemble the chat message array: system first, prior turns in order,
/// then the new user text.
fn build_messages(system: &str, history: &[Turn], user_text: &str) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(json!({ "role": "system", "content": system }));
    for turn in history {
        messages.push(json!({ "role": turn.role.as_str(), "content": turn.content }));
    }
    messages.push(json!({ "role": "user", "content": user_text }));
    messages
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, system: &str, history: &[Turn], user_text: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "messages": build_messages(system, history, user_text),
            "max_tokens": self.max_tokens,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }

        debug!(model = %self.model, history_turns = history.len(), "requesting completion");

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("completion request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PreceptorError::Provider(format!(
                "completion API error {status}: {body}"
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| PreceptorError::Provider(format!("completion response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(PreceptorError::Provider(
                "completion returned no content".into(),
            ));
        }
        Ok(text)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.embedding_model,
                "input": [text],
            }))
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("embedding request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PreceptorError::Provider(format!(
                "embedding API error {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| PreceptorError::Provider(format!("embedding response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| PreceptorError::Provider("embedding returned no vectors".into()))
    }
}
