// src/providers/completion.rs
// OpenAI-compatible chat completion client

use super::CompletionClient;
use crate::error::{EngramError, Result};
use async_trait::async_trait;
use std::time::Duration;

const TIMEOUT_SECS: u64 = 60;

/// [`CompletionClient`] speaking an OpenAI-compatible
/// `/chat/completions` endpoint. Works against OpenAI, DeepSeek, and
/// local inference servers that expose the same surface.
pub struct HttpCompletionClient {
    base_url: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url,
            api_key,
            model,
            http_client,
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngramError::Llm(format!("API error {status}: {text}")));
        }

        let json: serde_json::Value = response.json().await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| EngramError::Llm("no content in completion response".to_string()))
    }
}
