// src/store/mod.rs
// SQLite-backed memory store: rusqlite + sqlite-vec behind an async pool.
//
// Sync functions over `&rusqlite::Connection` do the actual work and are
// composed inside transactions by callers; `StorePool` provides the async
// entry points.

mod links;
mod memories;
mod pool;
mod schema;
pub mod test_support;

pub use links::{
    create_link_sync, delete_link_sync, get_links_sync, supersedes_from_sync, transfer_links_sync,
};
pub use memories::{
    SaveMemoryParams, count_active_sync, delete_memory_sync, get_active_memories_with_embeddings_sync,
    get_memory_sync, invalidate_memory_sync, nearest_active_sync, record_access_sync,
    restore_memory_sync, save_memory_sync, search_active_sync, store_embedding_sync,
};
pub use pool::StorePool;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Serialize a timestamp for storage.
pub(crate) fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a stored timestamp. Accepts RFC 3339 plus the bare SQLite
/// `CURRENT_TIMESTAMP` formats, for rows written outside this crate.
pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|ndt| ndt.and_utc())
}

/// Encode an embedding as the little-endian f32 blob sqlite-vec expects.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a sqlite-vec f32 blob back into an embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Convert a cosine distance (as reported by `vec_distance_cosine`) into
/// a similarity score.
pub fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance).clamp(-1.0, 1.0)
}
