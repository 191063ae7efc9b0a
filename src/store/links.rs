// src/store/links.rs
// Memory link CRUD and bulk transfer.
//
// Self-loops are filtered silently at every entry point - retiring a
// memory in favor of its own link partner must never produce a link
// where source and target coincide.

use super::parse_ts;
use crate::types::{LinkRelation, MemoryLink, MemoryLinks};
use anyhow::Result;
use rusqlite::{Connection, params};
use std::str::FromStr;

const LINK_COLUMNS: &str =
    "id, source_id, target_id, relation, weight, valid_from, valid_until, llm_enriched";

fn parse_link_row(row: &rusqlite::Row) -> rusqlite::Result<MemoryLink> {
    let relation: String = row.get(3)?;
    Ok(MemoryLink {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation: LinkRelation::from_str(&relation).unwrap_or(LinkRelation::Related),
        weight: row.get(4)?,
        valid_from: row.get::<_, Option<String>>(5)?.as_deref().and_then(parse_ts),
        valid_until: row.get::<_, Option<String>>(6)?.as_deref().and_then(parse_ts),
        llm_enriched: row.get::<_, i64>(7)? != 0,
    })
}

/// Create a link. Returns the new link id, or `None` when the link was a
/// self-loop (silently filtered) or a duplicate of an existing edge.
pub fn create_link_sync(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    relation: LinkRelation,
    weight: f32,
    llm_enriched: bool,
) -> Result<Option<i64>> {
    if source_id == target_id {
        tracing::debug!("[links] filtered self-loop on memory {source_id}");
        return Ok(None);
    }

    let relation_str: &'static str = relation.into();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO memory_links (source_id, target_id, relation, weight, llm_enriched)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![source_id, target_id, relation_str, weight, llm_enriched as i64],
    )?;

    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

/// All links touching a memory, split by direction.
pub fn get_links_sync(conn: &Connection, memory_id: i64) -> Result<MemoryLinks> {
    let mut outgoing_stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS} FROM memory_links WHERE source_id = ?1 ORDER BY id"
    ))?;
    let outgoing = outgoing_stmt
        .query_map([memory_id], parse_link_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut incoming_stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS} FROM memory_links WHERE target_id = ?1 ORDER BY id"
    ))?;
    let incoming = incoming_stmt
        .query_map([memory_id], parse_link_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(MemoryLinks { outgoing, incoming })
}

/// Delete a link by id. Returns whether a row was removed.
pub fn delete_link_sync(conn: &Connection, link_id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM memory_links WHERE id = ?1", [link_id])?;
    Ok(deleted > 0)
}

/// Re-point every link touching `from_id` at `to_id`.
///
/// Links that would become self-loops on `to_id` are dropped, and links
/// that would duplicate an existing edge collapse into it (unique on
/// source/target/relation). Returns the number of links re-pointed.
pub fn transfer_links_sync(conn: &Connection, from_id: i64, to_id: i64) -> Result<usize> {
    // Outgoing: from -> x becomes to -> x, except x == to
    let moved_out = conn.execute(
        "UPDATE OR IGNORE memory_links SET source_id = ?2
         WHERE source_id = ?1 AND target_id != ?2",
        params![from_id, to_id],
    )?;
    // Leftovers are would-be self-loops or duplicates of existing edges
    conn.execute("DELETE FROM memory_links WHERE source_id = ?1", [from_id])?;

    // Incoming: x -> from becomes x -> to, except x == to
    let moved_in = conn.execute(
        "UPDATE OR IGNORE memory_links SET target_id = ?2
         WHERE target_id = ?1 AND source_id != ?2",
        params![from_id, to_id],
    )?;
    conn.execute("DELETE FROM memory_links WHERE target_id = ?1", [from_id])?;

    Ok(moved_out + moved_in)
}

/// All `supersedes` edges originating at a memory - the consolidation
/// undo trail.
pub fn supersedes_from_sync(conn: &Connection, source_id: i64) -> Result<Vec<MemoryLink>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS} FROM memory_links
         WHERE source_id = ?1 AND relation = 'supersedes' ORDER BY id"
    ))?;
    let links = stmt
        .query_map([source_id], parse_link_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}
