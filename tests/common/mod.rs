// tests/common/mod.rs
// Shared test doubles for integration tests

use async_trait::async_trait;
use engram::error::Result;
use engram::providers::{CompletionClient, Embedder};

/// Install a test-writer tracing subscriber (idempotent).
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Embedder that maps known substrings to fixed vectors. Texts that
/// match no entry get the fallback vector.
pub struct TableEmbedder {
    pub dim: usize,
    pub entries: Vec<(&'static str, Vec<f32>)>,
    pub fallback: Vec<f32>,
}

impl TableEmbedder {
    pub fn new(dim: usize, entries: Vec<(&'static str, Vec<f32>)>) -> Self {
        Self {
            dim,
            entries,
            fallback: vec![0.0; dim],
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        for (key, vector) in &self.entries {
            if text.contains(key) {
                return Ok(vector.clone());
            }
        }
        Ok(self.fallback.clone())
    }

    fn dimensions(&self) -> usize {
        self.dim
    }
}

/// Completion client with a canned response.
pub struct FixedCompletion {
    pub response: String,
}

#[async_trait]
impl CompletionClient for FixedCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}
