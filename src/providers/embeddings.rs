// src/providers/embeddings.rs
// Gemini embeddings API client

use super::Embedder;
use crate::error::{EngramError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default embedding dimensions (Gemini embedding models support
/// `outputDimensionality` truncation; 768 keeps the vector table compact).
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// Max characters to embed (truncate longer text)
const MAX_TEXT_CHARS: usize = 8000;

/// Max batch size for batch embedding
const MAX_BATCH_SIZE: usize = 50;

/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;

/// Retry attempts
const RETRY_ATTEMPTS: usize = 2;

/// HTTP-backed [`Embedder`] speaking the Gemini embeddings API.
pub struct HttpEmbedder {
    api_key: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, "gemini-embedding-001".to_string(), DEFAULT_EMBEDDING_DIM)
    }

    pub fn with_model(api_key: String, model: String, dimensions: usize) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key,
            model,
            dimensions,
            http_client,
        }
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": truncate(text) }] },
            "outputDimensionality": self.dimensions
        })
    }

    fn parse_embedding(&self, value: &serde_json::Value) -> Result<Vec<f32>> {
        let values = value["values"]
            .as_array()
            .ok_or_else(|| EngramError::Embedding("missing values array".to_string()))?;
        let embedding: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        if embedding.len() != self.dimensions {
            return Err(EngramError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    async fn embed_batch_inner(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:batchEmbedContents?key={}",
            self.model, self.api_key
        );

        let requests: Vec<_> = texts.iter().map(|t| self.request_body(t)).collect();
        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngramError::Embedding(format!(
                "batch API error {status}: {text}"
            )));
        }

        let json: serde_json::Value = response.json().await?;
        let embeddings = json["embeddings"]
            .as_array()
            .ok_or_else(|| EngramError::Embedding("invalid batch response".to_string()))?;

        embeddings.iter().map(|e| self.parse_embedding(e)).collect()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent?key={}",
            self.model, self.api_key
        );
        let body = self.request_body(text);

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }

            match self.http_client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    let json: serde_json::Value = response.json().await?;
                    return self.parse_embedding(&json["embedding"]);
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last_error = Some(EngramError::Embedding(format!(
                        "API error {status}: {text}"
                    )));
                }
                Err(e) => {
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| EngramError::Embedding("unknown embedding failure".to_string())))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // Small batches: sequential single calls (keeps retry behavior)
        if texts.len() <= 2 {
            let mut results = Vec::with_capacity(texts.len());
            for text in texts {
                results.push(self.embed(text).await?);
            }
            return Ok(results);
        }

        let mut all_results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            all_results.extend(self.embed_batch_inner(chunk).await?);
        }
        Ok(all_results)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn truncate(text: &str) -> &str {
    if text.len() > MAX_TEXT_CHARS {
        debug!(
            "truncating embed input from {} to {} chars",
            text.len(),
            MAX_TEXT_CHARS
        );
        let mut end = MAX_TEXT_CHARS;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    } else {
        text
    }
}
