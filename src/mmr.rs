// src/mmr.rs
// Maximal Marginal Relevance diversity reranking

use crate::types::ScoredMemory;
use serde::Deserialize;

/// Default relevance/diversity trade-off. 1.0 is pure relevance order,
/// 0.0 maximizes spread.
pub const DEFAULT_LAMBDA: f32 = 0.8;

/// Candidate pools at or above this size use the parallel scan.
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 256;

/// Configuration for diversity reranking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MmrConfig {
    pub enabled: bool,
    pub lambda: f32,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: DEFAULT_LAMBDA,
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Zero-norm or length-mismatched inputs score 0, never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Greedy MMR rerank.
///
/// At each step every remaining candidate is scored
/// `lambda * similarity - (1 - lambda) * max_sim_to_selected` and the
/// best is moved into the selected prefix, its `similarity` field
/// overwritten with the MMR score so downstream consumers re-sort
/// consistently. Results without an embedding cannot be
/// diversity-scored; they are appended after the selected prefix in
/// their original order.
///
/// No-op when the list has at most one entry or no entry carries an
/// embedding.
pub fn apply_mmr(results: Vec<ScoredMemory>, lambda: f32, limit: usize) -> Vec<ScoredMemory> {
    if results.len() <= 1 || !results.iter().any(|r| r.memory.embedding.is_some()) {
        return results;
    }

    let (mut remaining, tail): (Vec<ScoredMemory>, Vec<ScoredMemory>) = results
        .into_iter()
        .partition(|r| r.memory.embedding.is_some());

    let mut selected: Vec<ScoredMemory> = Vec::with_capacity(remaining.len().min(limit));
    while selected.len() < limit && !remaining.is_empty() {
        let (best_idx, best_score) = best_candidate(&remaining, &selected, lambda);
        let mut chosen = remaining.swap_remove(best_idx);
        chosen.similarity = best_score;
        selected.push(chosen);
    }

    selected.extend(tail);
    selected
}

/// Index and MMR score of the best remaining candidate.
fn best_candidate(
    remaining: &[ScoredMemory],
    selected: &[ScoredMemory],
    lambda: f32,
) -> (usize, f32) {
    let score_one = |candidate: &ScoredMemory| -> f32 {
        let redundancy = max_similarity_to_selected(candidate, selected);
        lambda * candidate.similarity - (1.0 - lambda) * redundancy
    };

    #[cfg(feature = "parallel")]
    if remaining.len() >= PARALLEL_THRESHOLD {
        use rayon::prelude::*;
        return remaining
            .par_iter()
            .enumerate()
            .map(|(i, c)| (i, score_one(c)))
            .reduce(
                || (0, f32::NEG_INFINITY),
                |a, b| if b.1 > a.1 { b } else { a },
            );
    }

    let mut best = (0, f32::NEG_INFINITY);
    for (i, candidate) in remaining.iter().enumerate() {
        let score = score_one(candidate);
        if score > best.1 {
            best = (i, score);
        }
    }
    best
}

/// Highest cosine similarity between a candidate and any already-selected
/// result. 0 when nothing is selected yet.
fn max_similarity_to_selected(candidate: &ScoredMemory, selected: &[ScoredMemory]) -> f32 {
    let Some(embedding) = candidate.memory.embedding.as_ref() else {
        return 0.0;
    };
    selected
        .iter()
        .filter_map(|s| s.memory.embedding.as_ref())
        .map(|sel| cosine_similarity(embedding, sel))
        .fold(0.0_f32, f32::max)
}


#[cfg(test)]
mod mmr_tests {
    use super::*;
    use crate::types::tests::test_memory;

    fn scored(id: i64, similarity: f32, embedding: Option<Vec<f32>>) -> ScoredMemory {
        let mut m = test_memory(id);
        m.embedding = embedding;
        ScoredMemory::new(m, similarity)
    }

    #[test]
    fn test_single_item_noop() {
        let results = vec![scored(1, 0.9, Some(vec![1.0, 0.0]))];
        let out = apply_mmr(results, 0.8, 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].similarity, 0.9, "single item must pass through untouched");
    }

    #[test]
    fn test_no_embeddings_noop() {
        let results = vec![scored(1, 0.9, None), scored(2, 0.8, None)];
        let out = apply_mmr(results, 0.8, 10);
        assert_eq!(out[0].memory.id, 1);
        assert_eq!(out[0].similarity, 0.9);
        assert_eq!(out[1].similarity, 0.8);
    }

    #[test]
    fn test_lambda_one_preserves_relevance_order() {
        let results = vec![
            scored(1, 0.9, Some(vec![1.0, 0.0])),
            scored(2, 0.8, Some(vec![1.0, 0.01])),
            scored(3, 0.7, Some(vec![0.0, 1.0])),
        ];
        let out = apply_mmr(results, 1.0, 10);
        let ids: Vec<i64> = out.iter().map(|r| r.memory.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_diversity_demotes_near_duplicate() {
        // Items 1 and 2 are nearly identical vectors; 3 is orthogonal.
        // With a diversity-leaning lambda, 3 should outrank 2.
        let results = vec![
            scored(1, 0.9, Some(vec![1.0, 0.0])),
            scored(2, 0.85, Some(vec![0.999, 0.01])),
            scored(3, 0.6, Some(vec![0.0, 1.0])),
        ];
        let out = apply_mmr(results, 0.5, 10);
        let ids: Vec<i64> = out.iter().map(|r| r.memory.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn test_embedding_less_appended_after_prefix() {
        let results = vec![
            scored(1, 0.9, Some(vec![1.0, 0.0])),
            scored(2, 0.95, None),
            scored(3, 0.5, Some(vec![0.0, 1.0])),
        ];
        let out = apply_mmr(results, 0.8, 10);
        let ids: Vec<i64> = out.iter().map(|r| r.memory.id).collect();
        assert_eq!(ids, vec![1, 3, 2], "embedding-less result goes last");
    }

    #[test]
    fn test_limit_truncates_selection() {
        let results = vec![
            scored(1, 0.9, Some(vec![1.0, 0.0])),
            scored(2, 0.8, Some(vec![0.9, 0.1])),
            scored(3, 0.7, Some(vec![0.0, 1.0])),
        ];
        let out = apply_mmr(results, 0.8, 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_scores_overwritten_with_mmr_score() {
        let results = vec![
            scored(1, 0.9, Some(vec![1.0, 0.0])),
            scored(2, 0.8, Some(vec![1.0, 0.0])),
        ];
        let out = apply_mmr(results, 0.8, 10);
        // First pick: lambda * 0.9; second: lambda * 0.8 - 0.2 * 1.0
        assert!((out[0].similarity - 0.72).abs() < 1e-4);
        assert!((out[1].similarity - 0.44).abs() < 1e-4);
    }
}
