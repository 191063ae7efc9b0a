// src/store/test_support.rs
// Shared helpers for store-backed tests

use super::{SaveMemoryParams, StorePool, save_memory_sync};
use crate::types::MemoryType;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Embedding dimensionality used across tests - small on purpose.
pub const TEST_DIM: usize = 4;

/// Create a test pool (shared-cache in-memory DB).
pub async fn setup_test_pool() -> Arc<StorePool> {
    Arc::new(
        StorePool::open_in_memory(TEST_DIM)
            .await
            .expect("Failed to open in-memory pool"),
    )
}

/// Everything needed to seed a memory for a test, with quiet defaults.
#[derive(Debug, Clone)]
pub struct TestMemory {
    pub content: String,
    pub embedding: Vec<f32>,
    pub quality: Option<f32>,
    pub age_days: i64,
}

impl TestMemory {
    pub fn new(content: &str, embedding: &[f32]) -> Self {
        Self {
            content: content.to_string(),
            embedding: embedding.to_vec(),
            quality: None,
            age_days: 0,
        }
    }

    pub fn quality(mut self, q: f32) -> Self {
        self.quality = Some(q);
        self
    }

    pub fn age_days(mut self, days: i64) -> Self {
        self.age_days = days;
        self
    }
}

/// Insert a seeded memory, returning its id.
pub async fn insert_test_memory(pool: &Arc<StorePool>, memory: TestMemory) -> i64 {
    pool.interact(move |conn| {
        save_memory_sync(
            conn,
            SaveMemoryParams {
                content: &memory.content,
                memory_type: Some(MemoryType::Observation),
                quality_score: memory.quality,
                embedding: Some(&memory.embedding),
                created_at: Some(Utc::now() - Duration::days(memory.age_days)),
                ..Default::default()
            },
        )
    })
    .await
    .expect("Failed to insert test memory")
}
