// src/store/schema.rs
// Schema for the memory corpus. Idempotent; safe to run on every open.
//
// Soft-delete model: `memories.invalidated_by` is a nullable self-FK.
// A non-null value marks the row as a tombstone - every active-corpus
// query must filter `invalidated_by IS NULL` explicitly. Rows are only
// physically deleted when undoing a synthetic merge product.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    source TEXT,
    memory_type TEXT,
    quality_score REAL,
    quality_specificity REAL,
    quality_clarity REAL,
    quality_relevance REAL,
    quality_uniqueness REAL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    created_at TEXT NOT NULL,
    valid_from TEXT,
    valid_until TEXT,
    invalidated_by INTEGER REFERENCES memories(id)
);

CREATE INDEX IF NOT EXISTS idx_memories_active
    ON memories(invalidated_by) WHERE invalidated_by IS NULL;

CREATE TABLE IF NOT EXISTS memory_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES memories(id),
    target_id INTEGER NOT NULL REFERENCES memories(id),
    relation TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    valid_from TEXT,
    valid_until TEXT,
    llm_enriched INTEGER NOT NULL DEFAULT 0,
    CHECK (source_id != target_id)
);

CREATE INDEX IF NOT EXISTS idx_links_source ON memory_links(source_id);
CREATE INDEX IF NOT EXISTS idx_links_target ON memory_links(target_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_links_unique
    ON memory_links(source_id, target_id, relation);
"#;

/// Run all migrations, including the dimension-sensitive vector table.
pub fn run_migrations(conn: &Connection, embedding_dim: usize) -> Result<()> {
    conn.execute_batch(SCHEMA).context("base schema")?;
    ensure_vec_table(conn, embedding_dim)?;
    Ok(())
}

/// Create the sqlite-vec virtual table, recreating it when the embedding
/// dimensionality changed (vectors must be re-backfilled externally in
/// that case).
fn ensure_vec_table(conn: &Connection, embedding_dim: usize) -> Result<()> {
    let existing_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'vec_memories'",
            [],
            |row| row.get(0),
        )
        .ok();

    if let Some(sql) = existing_sql {
        match parse_vec_dimension(&sql) {
            Some(dim) if dim == embedding_dim => return Ok(()),
            Some(dim) => {
                tracing::warn!(
                    "[store] vec_memories dimension changed {dim} -> {embedding_dim}, rebuilding \
                     (embeddings must be backfilled)"
                );
                conn.execute("DROP TABLE vec_memories", [])
                    .context("drop stale vec_memories")?;
            }
            None => {
                tracing::warn!("[store] could not parse vec_memories dimension, rebuilding");
                conn.execute("DROP TABLE vec_memories", [])
                    .context("drop unparseable vec_memories")?;
            }
        }
    }

    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE vec_memories USING vec0(
            embedding float[{embedding_dim}],
            memory_id integer
        );"
    ))
    .context("create vec_memories")?;
    Ok(())
}

/// Extract N from `float[N]` in a CREATE VIRTUAL TABLE statement.
fn parse_vec_dimension(sql: &str) -> Option<usize> {
    let start = sql.find("float[")? + "float[".len();
    let rest = &sql[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}
