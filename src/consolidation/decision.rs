// src/consolidation/decision.rs
// Candidate generation and the per-pair action decision procedure

use super::ConsolidationConfig;
use crate::mmr::cosine_similarity;
use crate::store::{get_active_memories_with_embeddings_sync, nearest_active_sync};
use crate::types::Memory;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashSet;

/// What to do with a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairAction {
    /// Tombstone one memory in favor of the other.
    DeleteDuplicate {
        /// True when the first memory of the pair is the survivor.
        keep_first: bool,
    },
    /// Synthesize a combined memory and tombstone both originals.
    Merge,
    /// No mutation.
    KeepBoth,
}

/// An action plus its human-readable audit trail.
#[derive(Debug, Clone)]
pub struct PairDecision {
    pub action: PairAction,
    pub reason: String,
}

/// A pair of active memories queued for consolidation.
#[derive(Debug, Clone)]
pub struct ConsolidationCandidate {
    pub memory1: Memory,
    pub memory2: Memory,
    pub similarity: f32,
    pub decision: PairDecision,
}

/// Decide what to do with a pair of overlapping memories.
///
/// Three bands, walked top-down:
/// 1. Above `duplicate_threshold`: near-exact duplicate - tombstone one.
///    A clear quality gap picks the survivor; otherwise the newer
///    memory wins the tie-break.
/// 2. Above `merge_threshold`: if one content subsumes the other
///    (case-insensitive containment) keep the longer; otherwise both
///    carry unique information - merge.
/// 3. Down to the candidate floor: related but distinct - keep both.
#[allow(clippy::too_many_arguments)]
pub fn determine_action(
    similarity: f32,
    q1: Option<f32>,
    q2: Option<f32>,
    content1: &str,
    content2: &str,
    created1: DateTime<Utc>,
    created2: DateTime<Utc>,
    config: &ConsolidationConfig,
) -> PairDecision {
    if similarity > config.duplicate_threshold {
        let q1 = q1.unwrap_or(0.5);
        let q2 = q2.unwrap_or(0.5);
        if (q1 - q2).abs() > config.quality_gap {
            let keep_first = q1 > q2;
            return PairDecision {
                action: PairAction::DeleteDuplicate { keep_first },
                reason: format!(
                    "near-exact duplicate (similarity {similarity:.3}); keeping higher-quality \
                     memory ({:.2} vs {:.2})",
                    q1.max(q2),
                    q1.min(q2)
                ),
            };
        }
        let keep_first = created1 >= created2;
        return PairDecision {
            action: PairAction::DeleteDuplicate { keep_first },
            reason: format!(
                "near-exact duplicate (similarity {similarity:.3}); comparable quality, keeping \
                 the newer memory"
            ),
        };
    }

    if similarity > config.merge_threshold {
        let c1 = content1.to_lowercase();
        let c2 = content2.to_lowercase();
        if c1.contains(&c2) || c2.contains(&c1) {
            let keep_first = content1.len() >= content2.len();
            return PairDecision {
                action: PairAction::DeleteDuplicate { keep_first },
                reason: format!(
                    "one content contains the other (similarity {similarity:.3}); keeping the \
                     longer memory"
                ),
            };
        }
        return PairDecision {
            action: PairAction::Merge,
            reason: format!(
                "overlapping but both contain unique information (similarity {similarity:.3})"
            ),
        };
    }

    PairDecision {
        action: PairAction::KeepBoth,
        reason: format!("related but distinct (similarity {similarity:.3})"),
    }
}

/// Scan the active corpus for overlapping pairs.
///
/// Small corpora get an exact pairwise scan; beyond
/// `pairwise_scan_limit` memories, comparisons are restricted to each
/// memory's top-K vector neighbors so the scan stays far from O(n²)
/// SQL round trips on large corpora. Unordered pairs are deduplicated
/// by `(min_id, max_id)`.
pub fn generate_candidates_sync(
    conn: &Connection,
    config: &ConsolidationConfig,
) -> Result<Vec<ConsolidationCandidate>> {
    let memories = get_active_memories_with_embeddings_sync(conn)?;
    if memories.len() < 2 {
        return Ok(Vec::new());
    }

    let pairs: Vec<(usize, usize, f32)> = if memories.len() <= config.pairwise_scan_limit {
        pairwise_similarities(&memories, config.similarity_floor)
    } else {
        neighbor_similarities(conn, &memories, config)?
    };

    let mut seen: HashSet<(i64, i64)> = HashSet::new();
    let mut candidates: Vec<ConsolidationCandidate> = Vec::new();
    for (i, j, similarity) in pairs {
        let m1 = &memories[i];
        let m2 = &memories[j];
        let key = (m1.id.min(m2.id), m1.id.max(m2.id));
        if !seen.insert(key) {
            continue;
        }
        let decision = determine_action(
            similarity,
            m1.quality_score,
            m2.quality_score,
            &m1.content,
            &m2.content,
            m1.created_at,
            m2.created_at,
            config,
        );
        candidates.push(ConsolidationCandidate {
            memory1: m1.clone(),
            memory2: m2.clone(),
            similarity,
            decision,
        });
    }

    // Highest-overlap pairs first; cap the per-run workload
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if candidates.len() > config.max_candidates_per_run {
        tracing::info!(
            "[consolidation] capping {} candidates to {} for this run",
            candidates.len(),
            config.max_candidates_per_run
        );
        candidates.truncate(config.max_candidates_per_run);
    }

    Ok(candidates)
}

/// Exact in-memory pairwise scan for small corpora.
fn pairwise_similarities(memories: &[Memory], floor: f32) -> Vec<(usize, usize, f32)> {
    fn embedding(m: &Memory) -> &[f32] {
        m.embedding.as_deref().unwrap_or(&[])
    }

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        (0..memories.len())
            .into_par_iter()
            .flat_map_iter(move |i| {
                (i + 1..memories.len()).filter_map(move |j| {
                    let sim = cosine_similarity(embedding(&memories[i]), embedding(&memories[j]));
                    (sim >= floor).then_some((i, j, sim))
                })
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut pairs = Vec::new();
        for i in 0..memories.len() {
            for j in i + 1..memories.len() {
                let sim = cosine_similarity(embedding(&memories[i]), embedding(&memories[j]));
                if sim >= floor {
                    pairs.push((i, j, sim));
                }
            }
        }
        pairs
    }
}

/// Vector-index pre-filtered scan: each memory is compared only against
/// its top-K nearest active neighbors.
fn neighbor_similarities(
    conn: &Connection,
    memories: &[Memory],
    config: &ConsolidationConfig,
) -> Result<Vec<(usize, usize, f32)>> {
    let index_of: std::collections::HashMap<i64, usize> =
        memories.iter().enumerate().map(|(i, m)| (m.id, i)).collect();

    let mut pairs = Vec::new();
    for (i, memory) in memories.iter().enumerate() {
        let Some(embedding) = memory.embedding.as_deref() else {
            continue;
        };
        let neighbors =
            nearest_active_sync(conn, embedding, config.neighbors_per_memory, Some(memory.id))?;
        for (other_id, similarity) in neighbors {
            if similarity < config.similarity_floor {
                continue;
            }
            // A neighbor can vanish mid-scan if a concurrent writer
            // tombstones it; skip rather than error.
            let Some(&j) = index_of.get(&other_id) else {
                continue;
            };
            if i < j {
                pairs.push((i, j, similarity));
            } else {
                pairs.push((j, i, similarity));
            }
        }
    }
    Ok(pairs)
}
