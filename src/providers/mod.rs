// src/providers/mod.rs
// Capability-abstracted external signal providers.
//
// The core never branches on "is this backend configured" - components
// hold `Option<Arc<dyn ...>>` and degrade to heuristics or deterministic
// fallbacks when a provider is absent or fails.

mod completion;
mod embeddings;

pub use completion::HttpCompletionClient;
pub use embeddings::{DEFAULT_EMBEDDING_DIM, HttpEmbedder};

use crate::error::Result;
use async_trait::async_trait;

/// Turns text into a fixed-dimensionality vector. Dimensionality must be
/// stable across the corpus.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimensions(&self) -> usize;
}

/// A positive/negative label pair for zero-shot classification.
#[derive(Debug, Clone)]
pub struct LabelPair {
    pub positive: &'static str,
    pub negative: &'static str,
}

/// Zero-shot classifier: scores each label pair with the probability mass
/// on the positive label, in [0, 1].
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, pairs: &[LabelPair]) -> Result<Vec<f32>>;
}

/// Plain prompt-in, text-out completion.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}
