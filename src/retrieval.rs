// src/retrieval.rs
// The read path: semantic search over the active corpus, temporal
// scoring, diversity reranking, and best-effort access tracking.

use crate::decay::{DecayConfig, apply_temporal_scoring};
use crate::error::Result;
use crate::mmr::{MmrConfig, apply_mmr};
use crate::providers::Embedder;
use crate::store::{StorePool, record_access_sync, search_active_sync};
use crate::types::ScoredMemory;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Overfetch multiplier so decay filtering and MMR have candidates to
/// work with before the final truncation.
const OVERFETCH_FACTOR: usize = 3;

/// Memory retriever. Safe to share across concurrent readers; it holds
/// no mutable state.
///
/// Retrieval may run concurrently with a consolidation pass - the
/// active-corpus filter is applied by the store query, and a memory
/// tombstoned mid-query simply stops appearing in results rather than
/// erroring.
pub struct Retriever {
    pool: Arc<StorePool>,
    embedder: Arc<dyn Embedder>,
    decay: DecayConfig,
    mmr: MmrConfig,
}

impl Retriever {
    pub fn new(
        pool: Arc<StorePool>,
        embedder: Arc<dyn Embedder>,
        decay: DecayConfig,
        mmr: MmrConfig,
    ) -> Self {
        Self {
            pool,
            embedder,
            decay,
            mmr,
        }
    }

    /// Search by query text.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        let embedding = self.embedder.embed(query).await?;
        self.search_with_embedding(&embedding, limit).await
    }

    /// Search with a pre-computed query embedding.
    ///
    /// Pipeline: vector search (raw cosine similarity) → temporal
    /// scoring (decay + access boost, expired results dropped) → MMR
    /// diversity rerank → access tracking on the returned hits.
    pub async fn search_with_embedding(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let fetch = limit.saturating_mul(OVERFETCH_FACTOR);
        let query = embedding.to_vec();
        let results = self
            .pool
            .interact(move |conn| search_active_sync(conn, &query, fetch))
            .await?;
        debug!("[retrieval] {} raw hit(s)", results.len());

        let mut results = apply_temporal_scoring(results, &self.decay, Utc::now());
        if self.mmr.enabled {
            results = apply_mmr(results, self.mmr.lambda, limit);
        }
        results.truncate(limit);

        // Best-effort: a failed access bump must never fail a read
        let ids: Vec<i64> = results.iter().map(|r| r.memory.id).collect();
        if !ids.is_empty() {
            let now = Utc::now();
            self.pool
                .try_interact("[retrieval] access tracking", move |conn| {
                    for id in &ids {
                        record_access_sync(conn, *id, now)?;
                    }
                    Ok(())
                })
                .await;
        }

        Ok(results)
    }
}
