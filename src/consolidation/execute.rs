// src/consolidation/execute.rs
// Transactional execution of consolidation actions, plus undo.
//
// Every function here runs inside a transaction opened by the caller:
// one pair, one transaction. Soft-delete only - the only physical
// delete in this module is the removal of a synthetic merge product
// during undo.

use crate::store::{
    SaveMemoryParams, create_link_sync, delete_link_sync, delete_memory_sync, get_memory_sync,
    invalidate_memory_sync, restore_memory_sync, save_memory_sync, supersedes_from_sync,
    transfer_links_sync,
};
use crate::types::{LinkRelation, Memory, QualityFactors, SYNTHETIC_SOURCE};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// What happened to a single candidate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// One memory tombstoned in favor of the other.
    Deleted,
    /// Both memories tombstoned under a new synthetic memory.
    Merged(i64),
    /// Deliberately left untouched.
    Kept,
    /// Pair no longer actionable (a member was tombstoned earlier in
    /// the run, or by a concurrent writer). Counts as kept.
    Skipped(String),
}

/// Result of undoing a consolidation.
#[derive(Debug, Clone, Default)]
pub struct UndoOutcome {
    /// Memories restored to active.
    pub restored: Vec<i64>,
    /// Whether the synthetic merge product was physically removed.
    pub removed_synthetic: bool,
}

/// Fetch both members of a pair, verifying they are still active.
fn fetch_active_pair(
    conn: &Connection,
    id1: i64,
    id2: i64,
) -> Result<std::result::Result<(Memory, Memory), String>> {
    let m1 = get_memory_sync(conn, id1)?;
    let m2 = get_memory_sync(conn, id2)?;
    match (m1, m2) {
        (Some(a), Some(b)) if !a.is_tombstone() && !b.is_tombstone() => Ok(Ok((a, b))),
        (Some(a), Some(b)) => {
            let gone = if a.is_tombstone() { a.id } else { b.id };
            Ok(Err(format!("memory {gone} already superseded")))
        }
        _ => Ok(Err(format!("memory {id1} or {id2} no longer exists"))),
    }
}

/// Tombstone `drop_id` in favor of `keep_id`.
///
/// Transfers all of the loser's links to the survivor (self-loops
/// excluded), records the supersession edge, then invalidates the
/// loser. No row is deleted.
pub fn execute_delete_duplicate(
    conn: &Connection,
    keep_id: i64,
    drop_id: i64,
    now: DateTime<Utc>,
) -> Result<PairOutcome> {
    if let Err(reason) = fetch_active_pair(conn, keep_id, drop_id)? {
        return Ok(PairOutcome::Skipped(reason));
    }

    transfer_links_sync(conn, drop_id, keep_id)?;
    create_link_sync(conn, keep_id, drop_id, LinkRelation::Supersedes, 1.0, false)?;
    invalidate_memory_sync(conn, drop_id, keep_id, now)?;

    tracing::debug!("[consolidation] memory {drop_id} superseded by {keep_id}");
    Ok(PairOutcome::Deleted)
}

/// Replace a pair with a synthetic merged memory.
///
/// The merged memory's quality is the average of its parents' scores -
/// averaging rather than taking the max avoids quality inflation from
/// repeated merging. Links from both parents transfer to the merged
/// memory, both parents get a supersession edge and a tombstone.
pub fn execute_merge(
    conn: &Connection,
    id1: i64,
    id2: i64,
    merged_content: &str,
    merged_embedding: Option<&[f32]>,
    now: DateTime<Utc>,
) -> Result<PairOutcome> {
    let (m1, m2) = match fetch_active_pair(conn, id1, id2)? {
        Ok(pair) => pair,
        Err(reason) => return Ok(PairOutcome::Skipped(reason)),
    };

    let quality_score = average_option(m1.quality_score, m2.quality_score);
    let quality_factors = average_factors(m1.quality_factors, m2.quality_factors);
    let tags = union_tags(&m1.tags, &m2.tags);

    let merged_id = save_memory_sync(
        conn,
        SaveMemoryParams {
            content: merged_content,
            tags: &tags,
            source: Some(SYNTHETIC_SOURCE),
            memory_type: m1.memory_type.or(m2.memory_type),
            quality_score,
            quality_factors,
            embedding: merged_embedding,
            created_at: Some(now),
            ..Default::default()
        },
    )?;

    transfer_links_sync(conn, id1, merged_id)?;
    transfer_links_sync(conn, id2, merged_id)?;
    create_link_sync(conn, merged_id, id1, LinkRelation::Supersedes, 1.0, false)?;
    create_link_sync(conn, merged_id, id2, LinkRelation::Supersedes, 1.0, false)?;
    invalidate_memory_sync(conn, id1, merged_id, now)?;
    invalidate_memory_sync(conn, id2, merged_id, now)?;

    tracing::debug!("[consolidation] memories {id1} + {id2} merged into {merged_id}");
    Ok(PairOutcome::Merged(merged_id))
}

/// Reverse a consolidation rooted at `merged_id`.
///
/// Every memory the root supersedes is restored to active and the
/// supersession edge removed. A synthetic merge product is then
/// physically deleted; the survivor of a delete-duplicate is left in
/// place. No supersession edges means nothing to undo - a no-op, not
/// an error.
pub fn undo_consolidation_sync(conn: &Connection, merged_id: i64) -> Result<UndoOutcome> {
    let edges = supersedes_from_sync(conn, merged_id)?;
    if edges.is_empty() {
        tracing::debug!("[consolidation] no supersession edges at {merged_id}, nothing to undo");
        return Ok(UndoOutcome::default());
    }

    let mut restored = Vec::with_capacity(edges.len());
    for edge in &edges {
        restore_memory_sync(conn, edge.target_id)?;
        delete_link_sync(conn, edge.id)?;
        restored.push(edge.target_id);
    }

    let removed_synthetic = match get_memory_sync(conn, merged_id)? {
        Some(memory) if memory.is_synthetic() => {
            delete_memory_sync(conn, merged_id)?;
            true
        }
        _ => false,
    };

    tracing::info!(
        "[consolidation] undo at {merged_id}: restored {:?}, synthetic removed: {removed_synthetic}",
        restored
    );
    Ok(UndoOutcome {
        restored,
        removed_synthetic,
    })
}

fn average_option(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(x), Some(y)) => Some((x + y) / 2.0),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn average_factors(
    a: Option<QualityFactors>,
    b: Option<QualityFactors>,
) -> Option<QualityFactors> {
    match (a, b) {
        (Some(x), Some(y)) => Some(QualityFactors {
            specificity: (x.specificity + y.specificity) / 2.0,
            clarity: (x.clarity + y.clarity) / 2.0,
            relevance: (x.relevance + y.relevance) / 2.0,
            uniqueness: (x.uniqueness + y.uniqueness) / 2.0,
        }),
        (some, None) | (None, some) => some,
    }
}

/// Union of two tag sets, preserving first-seen order.
fn union_tags(a: &[String], b: &[String]) -> Vec<String> {
    let mut tags = a.to_vec();
    for tag in b {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    #[test]
    fn test_average_quality() {
        assert_eq!(average_option(Some(0.3), Some(0.9)), Some(0.6));
        assert_eq!(average_option(Some(0.4), None), Some(0.4));
        assert_eq!(average_option(None, None), None);
    }

    #[test]
    fn test_union_tags_order_and_dedup() {
        let a = vec!["db".to_string(), "infra".to_string()];
        let b = vec!["infra".to_string(), "perf".to_string()];
        assert_eq!(union_tags(&a, &b), vec!["db", "infra", "perf"]);
    }
}

#[cfg(test)]
mod execute_tests {
    use super::*;
    use crate::store::test_support::{TestMemory, insert_test_memory, setup_test_pool};
    use crate::store::{StorePool, get_links_sync};
    use std::sync::Arc;

    async fn seed_pair(pool: &Arc<StorePool>) -> (i64, i64) {
        let a = insert_test_memory(
            pool,
            TestMemory::new("keep me", &[1.0, 0.0, 0.0, 0.0]).quality(0.8),
        )
        .await;
        let b = insert_test_memory(
            pool,
            TestMemory::new("drop me", &[0.99, 0.01, 0.0, 0.0]).quality(0.3),
        )
        .await;
        (a, b)
    }

    #[tokio::test]
    async fn test_delete_duplicate_is_soft() {
        let pool = setup_test_pool().await;
        let (keep, drop) = seed_pair(&pool).await;

        pool.interact(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let outcome = execute_delete_duplicate(&tx, keep, drop, Utc::now())?;
            tx.commit()?;
            assert_eq!(outcome, PairOutcome::Deleted);

            // Loser still fetchable, tombstoned, validity closed
            let loser = get_memory_sync(conn, drop)?.expect("row still exists");
            assert_eq!(loser.invalidated_by, Some(keep));
            assert!(loser.valid_until.is_some());

            // Supersession edge recorded
            let edges = supersedes_from_sync(conn, keep)?;
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].target_id, drop);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_delete_duplicate_transfers_links() {
        let pool = setup_test_pool().await;
        let (keep, drop) = seed_pair(&pool).await;
        let other =
            insert_test_memory(&pool, TestMemory::new("other", &[0.0, 0.0, 1.0, 0.0])).await;

        pool.interact(move |conn| {
            create_link_sync(conn, drop, other, LinkRelation::CausedBy, 0.9, false)?;
            create_link_sync(conn, other, drop, LinkRelation::References, 0.5, false)?;
            // A link between the pair itself must not become a self-loop
            create_link_sync(conn, drop, keep, LinkRelation::SimilarTo, 1.0, false)?;

            let tx = conn.unchecked_transaction()?;
            execute_delete_duplicate(&tx, keep, drop, Utc::now())?;
            tx.commit()?;

            let links = get_links_sync(conn, keep)?;
            assert!(
                links
                    .outgoing
                    .iter()
                    .chain(links.incoming.iter())
                    .all(|l| l.source_id != l.target_id),
                "link transfer must never create a self-loop"
            );
            // keep -> other (transferred), keep -> drop (supersedes)
            assert_eq!(links.outgoing.len(), 2);
            // other -> keep (transferred)
            assert_eq!(links.incoming.len(), 1);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_merge_averages_quality() {
        let pool = setup_test_pool().await;
        let a = insert_test_memory(
            &pool,
            TestMemory::new("pool uses WAL", &[1.0, 0.0, 0.0, 0.0]).quality(0.3),
        )
        .await;
        let b = insert_test_memory(
            &pool,
            TestMemory::new("pool retries on busy", &[0.99, 0.01, 0.0, 0.0]).quality(0.9),
        )
        .await;

        pool.interact(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let outcome =
                execute_merge(&tx, a, b, "pool uses WAL and retries on busy", None, Utc::now())?;
            tx.commit()?;

            let PairOutcome::Merged(merged_id) = outcome else {
                panic!("expected merge, got {outcome:?}");
            };

            let merged = get_memory_sync(conn, merged_id)?.expect("merged exists");
            assert_eq!(merged.quality_score, Some(0.6), "average, not max");
            assert!(merged.is_synthetic());

            // Both parents tombstoned at the merged memory
            for parent in [a, b] {
                let p = get_memory_sync(conn, parent)?.expect("parent row kept");
                assert_eq!(p.invalidated_by, Some(merged_id));
            }

            let edges = supersedes_from_sync(conn, merged_id)?;
            assert_eq!(edges.len(), 2);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stale_pair_skipped() {
        let pool = setup_test_pool().await;
        let (keep, drop) = seed_pair(&pool).await;
        let third =
            insert_test_memory(&pool, TestMemory::new("third", &[0.98, 0.02, 0.0, 0.0])).await;

        pool.interact(move |conn| {
            // First action retires `drop`
            let tx = conn.unchecked_transaction()?;
            execute_delete_duplicate(&tx, keep, drop, Utc::now())?;
            tx.commit()?;

            // A later pair in the same run still references it
            let tx = conn.unchecked_transaction()?;
            let outcome = execute_delete_duplicate(&tx, third, drop, Utc::now())?;
            tx.commit()?;
            assert!(
                matches!(outcome, PairOutcome::Skipped(_)),
                "tombstoned member makes the pair unactionable"
            );
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_undo_merge_restores_parents() {
        let pool = setup_test_pool().await;
        let (a, b) = seed_pair(&pool).await;

        pool.interact(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let outcome = execute_merge(&tx, a, b, "merged content", None, Utc::now())?;
            tx.commit()?;
            let PairOutcome::Merged(merged_id) = outcome else {
                panic!("expected merge");
            };

            let tx = conn.unchecked_transaction()?;
            let undo = undo_consolidation_sync(&tx, merged_id)?;
            tx.commit()?;

            assert_eq!(undo.restored.len(), 2);
            assert!(undo.removed_synthetic);
            assert!(
                get_memory_sync(conn, merged_id)?.is_none(),
                "synthetic product physically removed"
            );
            for parent in [a, b] {
                let p = get_memory_sync(conn, parent)?.expect("parent exists");
                assert_eq!(p.invalidated_by, None);
                assert_eq!(p.valid_until, None);
            }
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_undo_delete_duplicate_keeps_survivor() {
        let pool = setup_test_pool().await;
        let (keep, drop) = seed_pair(&pool).await;

        pool.interact(move |conn| {
            let tx = conn.unchecked_transaction()?;
            execute_delete_duplicate(&tx, keep, drop, Utc::now())?;
            tx.commit()?;

            let tx = conn.unchecked_transaction()?;
            let undo = undo_consolidation_sync(&tx, keep)?;
            tx.commit()?;

            assert_eq!(undo.restored, vec![drop]);
            assert!(!undo.removed_synthetic, "survivor is not synthetic");
            assert!(get_memory_sync(conn, keep)?.is_some(), "survivor left in place");
            let restored = get_memory_sync(conn, drop)?.expect("restored");
            assert_eq!(restored.invalidated_by, None);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_undo_without_edges_is_noop() {
        let pool = setup_test_pool().await;
        let a = insert_test_memory(&pool, TestMemory::new("lonely", &[1.0, 0.0, 0.0, 0.0])).await;

        pool.interact(move |conn| {
            let undo = undo_consolidation_sync(conn, a)?;
            assert!(undo.restored.is_empty());
            assert!(!undo.removed_synthetic);
            // And the memory is untouched
            assert!(get_memory_sync(conn, a)?.is_some());
            Ok(())
        })
        .await
        .unwrap();
    }
}
