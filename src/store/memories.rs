// src/store/memories.rs
// Memory row storage, retrieval, and tombstone lifecycle

use super::{
    bytes_to_embedding, distance_to_similarity, embedding_to_bytes, format_ts, parse_ts,
};
use crate::types::{Memory, MemoryType, QualityFactors, ScoredMemory};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::str::FromStr;

/// Standard column list for memory queries (16 columns; append
/// `v.embedding` as the 17th when joining the vector table).
const MEMORY_COLUMNS: &str = "m.id, m.content, m.tags, m.source, m.memory_type, \
     m.quality_score, m.quality_specificity, m.quality_clarity, m.quality_relevance, \
     m.quality_uniqueness, m.access_count, m.last_accessed, m.created_at, \
     m.valid_from, m.valid_until, m.invalidated_by";

/// Parse a Memory from a row in MEMORY_COLUMNS order. The embedding (if
/// selected) is attached by the caller.
fn parse_memory_row(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get(2)?;
    let memory_type: Option<String> = row.get(4)?;

    let factors = match (
        row.get::<_, Option<f32>>(6)?,
        row.get::<_, Option<f32>>(7)?,
        row.get::<_, Option<f32>>(8)?,
        row.get::<_, Option<f32>>(9)?,
    ) {
        (Some(specificity), Some(clarity), Some(relevance), Some(uniqueness)) => {
            Some(QualityFactors {
                specificity,
                clarity,
                relevance,
                uniqueness,
            })
        }
        _ => None,
    };

    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        source: row.get(3)?,
        memory_type: memory_type.as_deref().and_then(|s| MemoryType::from_str(s).ok()),
        embedding: None,
        quality_score: row.get(5)?,
        quality_factors: factors,
        access_count: row.get(10)?,
        last_accessed: row.get::<_, Option<String>>(11)?.as_deref().and_then(parse_ts),
        created_at: parse_ts(&row.get::<_, String>(12)?).unwrap_or_else(Utc::now),
        valid_from: row.get::<_, Option<String>>(13)?.as_deref().and_then(parse_ts),
        valid_until: row.get::<_, Option<String>>(14)?.as_deref().and_then(parse_ts),
        invalidated_by: row.get(15)?,
    })
}

/// Parameters for saving a new memory.
#[derive(Debug, Clone, Default)]
pub struct SaveMemoryParams<'a> {
    pub content: &'a str,
    pub tags: &'a [String],
    pub source: Option<&'a str>,
    pub memory_type: Option<MemoryType>,
    pub quality_score: Option<f32>,
    pub quality_factors: Option<QualityFactors>,
    pub embedding: Option<&'a [f32]>,
    /// Defaults to now when absent.
    pub created_at: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Insert a memory (and its embedding, when present). Returns the new id.
pub fn save_memory_sync(conn: &Connection, params: SaveMemoryParams) -> Result<i64> {
    let tags_json = serde_json::to_string(params.tags)?;
    let memory_type: Option<&'static str> = params.memory_type.map(Into::into);
    let created_at = format_ts(params.created_at.unwrap_or_else(Utc::now));
    let (q_spec, q_clar, q_rel, q_uniq) = match params.quality_factors {
        Some(f) => (
            Some(f.specificity),
            Some(f.clarity),
            Some(f.relevance),
            Some(f.uniqueness),
        ),
        None => (None, None, None, None),
    };

    conn.execute(
        "INSERT INTO memories (content, tags, source, memory_type, quality_score,
             quality_specificity, quality_clarity, quality_relevance, quality_uniqueness,
             created_at, valid_from, valid_until)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            params.content,
            tags_json,
            params.source,
            memory_type,
            params.quality_score,
            q_spec,
            q_clar,
            q_rel,
            q_uniq,
            created_at,
            params.valid_from.map(format_ts),
            params.valid_until.map(format_ts),
        ],
    )
    .context("insert memory")?;
    let id = conn.last_insert_rowid();

    if let Some(embedding) = params.embedding {
        store_embedding_sync(conn, id, embedding)?;
    }

    Ok(id)
}

/// Insert or replace a memory's embedding row.
pub fn store_embedding_sync(conn: &Connection, memory_id: i64, embedding: &[f32]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO vec_memories (rowid, embedding, memory_id) VALUES (?1, ?2, ?3)",
        params![memory_id, embedding_to_bytes(embedding), memory_id],
    )
    .context("store embedding")?;
    Ok(())
}

/// Fetch a memory by id, tombstoned or not. Embedding included when one
/// is stored.
pub fn get_memory_sync(conn: &Connection, id: i64) -> Result<Option<Memory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, v.embedding
         FROM memories m LEFT JOIN vec_memories v ON v.memory_id = m.id
         WHERE m.id = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map([id], |row| {
        let mut memory = parse_memory_row(row)?;
        let blob: Option<Vec<u8>> = row.get(16)?;
        memory.embedding = blob.as_deref().map(bytes_to_embedding);
        Ok(memory)
    })?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// All active (non-tombstoned) memories that have an embedding - the
/// consolidation candidate universe.
pub fn get_active_memories_with_embeddings_sync(conn: &Connection) -> Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, v.embedding
         FROM memories m JOIN vec_memories v ON v.memory_id = m.id
         WHERE m.invalidated_by IS NULL
         ORDER BY m.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let mut memory = parse_memory_row(row)?;
        let blob: Vec<u8> = row.get(16)?;
        memory.embedding = Some(bytes_to_embedding(&blob));
        Ok(memory)
    })?;

    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Count of active memories.
pub fn count_active_sync(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM memories WHERE invalidated_by IS NULL",
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Tombstone a memory: close its validity window and point it at the
/// memory that superseded it. The row is not deleted.
pub fn invalidate_memory_sync(
    conn: &Connection,
    id: i64,
    superseded_by: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE memories SET valid_until = ?1, invalidated_by = ?2 WHERE id = ?3",
        params![format_ts(at), superseded_by, id],
    )?;
    if updated == 0 {
        anyhow::bail!("memory {id} not found");
    }
    Ok(())
}

/// Reverse a tombstone: clear the validity cutoff and supersession
/// pointer.
pub fn restore_memory_sync(conn: &Connection, id: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE memories SET valid_until = NULL, invalidated_by = NULL WHERE id = ?1",
        [id],
    )?;
    if updated == 0 {
        anyhow::bail!("memory {id} not found");
    }
    Ok(())
}

/// Physically delete a memory, its embedding, and any links touching it.
/// Only used when undoing a synthetic merge product.
pub fn delete_memory_sync(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM memory_links WHERE source_id = ?1 OR target_id = ?1",
        [id],
    )?;
    conn.execute("DELETE FROM vec_memories WHERE memory_id = ?1", [id])?;
    conn.execute("DELETE FROM memories WHERE id = ?1", [id])?;
    Ok(())
}

/// Record a retrieval hit: bump `access_count`, stamp `last_accessed`.
pub fn record_access_sync(conn: &Connection, id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
        params![format_ts(at), id],
    )?;
    Ok(())
}

/// Nearest active memories to an embedding: `(memory_id, similarity)`
/// ordered best-first. The vector-index pre-filter that keeps candidate
/// generation from being a full cross product.
pub fn nearest_active_sync(
    conn: &Connection,
    embedding: &[f32],
    k: usize,
    exclude_id: Option<i64>,
) -> Result<Vec<(i64, f32)>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, vec_distance_cosine(v.embedding, ?1) AS distance
         FROM memories m JOIN vec_memories v ON v.memory_id = m.id
         WHERE m.invalidated_by IS NULL AND (?2 IS NULL OR m.id != ?2)
         ORDER BY distance
         LIMIT ?3",
    )?;

    let rows = stmt.query_map(
        params![embedding_to_bytes(embedding), exclude_id, k as i64],
        |row| {
            let id: i64 = row.get(0)?;
            let distance: f32 = row.get(1)?;
            Ok((id, distance_to_similarity(distance)))
        },
    )?;

    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Semantic search over the active corpus: full rows with raw cosine
/// similarity, best-first.
pub fn search_active_sync(
    conn: &Connection,
    embedding: &[f32],
    limit: usize,
) -> Result<Vec<ScoredMemory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, v.embedding, vec_distance_cosine(v.embedding, ?1) AS distance
         FROM memories m JOIN vec_memories v ON v.memory_id = m.id
         WHERE m.invalidated_by IS NULL
         ORDER BY distance
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![embedding_to_bytes(embedding), limit as i64], |row| {
        let mut memory = parse_memory_row(row)?;
        let blob: Vec<u8> = row.get(16)?;
        memory.embedding = Some(bytes_to_embedding(&blob));
        let distance: f32 = row.get(17)?;
        Ok(ScoredMemory::new(memory, distance_to_similarity(distance)))
    })?;

    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}
