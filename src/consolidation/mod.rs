// src/consolidation/mod.rs
// Corpus maintenance: find near-duplicate/overlapping memory pairs and
// resolve them through reversible, transactional state transitions.
//
// Run discipline: at most one active run per corpus (named exclusive
// lock), one pair per transaction, per-pair failures recorded without
// blocking the rest of the run, cooperative cancellation between pairs.

mod decision;
mod execute;

pub use decision::{
    ConsolidationCandidate, PairAction, PairDecision, determine_action, generate_candidates_sync,
};
pub use execute::{
    PairOutcome, UndoOutcome, execute_delete_duplicate, execute_merge, undo_consolidation_sync,
};

use crate::error::{EngramError, Result};
use crate::providers::{CompletionClient, Embedder};
use crate::store::StorePool;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Configuration for consolidation runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Global opt-in. Consolidation mutates the corpus; it never runs
    /// unless explicitly enabled.
    pub enabled: bool,
    /// Per-project override. An explicit `false` always wins over the
    /// global flag; `true` cannot enable what the global flag disables.
    pub project_override: Option<bool>,
    /// Minimum similarity for a pair to become a candidate.
    pub similarity_floor: f32,
    /// Above this, a pair is a near-exact duplicate.
    pub duplicate_threshold: f32,
    /// Above this (and below `duplicate_threshold`), a pair merges
    /// unless one content contains the other.
    pub merge_threshold: f32,
    /// Quality difference below which two duplicates are considered
    /// equal and recency breaks the tie.
    pub quality_gap: f32,
    /// Cap on pairs processed per run.
    pub max_candidates_per_run: usize,
    /// Corpus size up to which candidate generation does an exact
    /// pairwise scan; larger corpora use the vector-index pre-filter.
    pub pairwise_scan_limit: usize,
    /// Top-K neighbors per memory in the pre-filtered scan.
    pub neighbors_per_memory: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_override: None,
            similarity_floor: 0.82,
            duplicate_threshold: 0.95,
            merge_threshold: 0.85,
            quality_gap: 0.1,
            max_candidates_per_run: 50,
            pairwise_scan_limit: 256,
            neighbors_per_memory: 8,
        }
    }
}

impl ConsolidationConfig {
    /// Effective opt-in: global flag AND override not explicitly false.
    pub fn effective_enabled(&self) -> bool {
        self.enabled && self.project_override != Some(false)
    }
}

/// Summary of one consolidation run. Totals always reconcile:
/// `merged + deleted + kept + errors.len() == candidates_found`.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    pub candidates_found: usize,
    pub merged: usize,
    pub deleted: usize,
    pub kept: usize,
    pub errors: Vec<String>,
}

impl ConsolidationReport {
    pub fn reconciles(&self) -> bool {
        self.merged + self.deleted + self.kept + self.errors.len() == self.candidates_found
    }
}

/// Cooperative cancellation flag, checked between pairs. Already
/// committed pairs are never rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// RAII holder for the per-corpus run lock.
struct RunGuard {
    key: String,
    registry: Arc<Mutex<HashSet<String>>>,
}

impl RunGuard {
    fn acquire(registry: &Arc<Mutex<HashSet<String>>>, key: &str) -> Result<Self> {
        let mut active = registry
            .lock()
            .map_err(|_| EngramError::Other("run lock registry poisoned".to_string()))?;
        if !active.insert(key.to_string()) {
            return Err(EngramError::RunActive(key.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            registry: Arc::clone(registry),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.lock() {
            active.remove(&self.key);
        }
    }
}

/// Top-level consolidation orchestrator.
///
/// The guard-rail policy around *when* to run (minimum memory age,
/// minimum corpus size, LLM-required merges) is evaluated by the caller;
/// this engine only enforces the opt-in flags and the run lock.
pub struct ConsolidationEngine {
    pool: Arc<StorePool>,
    config: ConsolidationConfig,
    embedder: Option<Arc<dyn Embedder>>,
    completion: Option<Arc<dyn CompletionClient>>,
    active_runs: Arc<Mutex<HashSet<String>>>,
}

impl ConsolidationEngine {
    pub fn new(pool: Arc<StorePool>, config: ConsolidationConfig) -> Self {
        Self {
            pool,
            config,
            embedder: None,
            completion: None,
            active_runs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Embedder for embedding synthetic merge products as they are
    /// created (otherwise they wait for external backfill).
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Completion client for LLM-assisted merge content synthesis.
    pub fn with_completion(mut self, completion: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Share a run-lock registry between engines covering the same
    /// corpora (e.g. one engine per tenant over a common registry).
    pub fn with_shared_locks(mut self, registry: Arc<Mutex<HashSet<String>>>) -> Self {
        self.active_runs = registry;
        self
    }

    /// Run one consolidation pass.
    pub async fn run(&self) -> Result<ConsolidationReport> {
        self.run_with_cancel(&CancelFlag::default()).await
    }

    /// Run one consolidation pass with cooperative cancellation.
    ///
    /// Cancellation is honored between pairs: unprocessed candidates are
    /// counted as kept and committed pairs stay committed.
    pub async fn run_with_cancel(&self, cancel: &CancelFlag) -> Result<ConsolidationReport> {
        if !self.config.effective_enabled() {
            info!("[consolidation] disabled (global or project override), skipping run");
            return Ok(ConsolidationReport::default());
        }

        let corpus = self.pool.corpus_key();
        let _guard = RunGuard::acquire(&self.active_runs, &corpus)?;

        let config = self.config.clone();
        let candidates = self
            .pool
            .interact(move |conn| generate_candidates_sync(conn, &config))
            .await?;

        let mut report = ConsolidationReport {
            candidates_found: candidates.len(),
            ..Default::default()
        };
        info!(
            "[consolidation] {} candidate pair(s) for corpus {corpus}",
            candidates.len()
        );

        let total = candidates.len();
        for (index, candidate) in candidates.into_iter().enumerate() {
            if cancel.is_cancelled() {
                let remaining = total - index;
                report.kept += remaining;
                info!("[consolidation] cancelled; {remaining} pair(s) left untouched");
                break;
            }

            let pair = (candidate.memory1.id, candidate.memory2.id);
            match self.execute_candidate(candidate).await {
                Ok(PairOutcome::Deleted) => report.deleted += 1,
                Ok(PairOutcome::Merged(_)) => report.merged += 1,
                Ok(PairOutcome::Kept) => report.kept += 1,
                Ok(PairOutcome::Skipped(reason)) => {
                    tracing::debug!("[consolidation] pair {pair:?} skipped: {reason}");
                    report.kept += 1;
                }
                Err(e) => {
                    warn!("[consolidation] pair {pair:?} failed: {e}");
                    report.errors.push(format!("pair {pair:?}: {e}"));
                }
            }
        }

        info!(
            "[consolidation] run complete: {} merged, {} deleted, {} kept, {} error(s)",
            report.merged,
            report.deleted,
            report.kept,
            report.errors.len()
        );
        debug_assert!(report.reconciles(), "run totals must reconcile");
        Ok(report)
    }

    /// Execute one candidate in its own transaction.
    async fn execute_candidate(&self, candidate: ConsolidationCandidate) -> Result<PairOutcome> {
        let id1 = candidate.memory1.id;
        let id2 = candidate.memory2.id;
        tracing::debug!(
            "[consolidation] pair ({id1}, {id2}): {:?} - {}",
            candidate.decision.action,
            candidate.decision.reason
        );

        match candidate.decision.action {
            PairAction::KeepBoth => Ok(PairOutcome::Kept),
            PairAction::DeleteDuplicate { keep_first } => {
                let (keep, drop) = if keep_first { (id1, id2) } else { (id2, id1) };
                let now = Utc::now();
                self.pool
                    .interact(move |conn| {
                        let tx = conn.unchecked_transaction()?;
                        let outcome = execute_delete_duplicate(&tx, keep, drop, now)?;
                        tx.commit()?;
                        Ok(outcome)
                    })
                    .await
                    .map_err(Into::into)
            }
            PairAction::Merge => {
                // Content synthesis and embedding happen outside the
                // transaction; only the state transition is atomic.
                let (content, embedding) = self
                    .synthesize_merge(&candidate.memory1.content, &candidate.memory2.content)
                    .await;
                let now = Utc::now();
                self.pool
                    .interact(move |conn| {
                        let tx = conn.unchecked_transaction()?;
                        let outcome =
                            execute_merge(&tx, id1, id2, &content, embedding.as_deref(), now)?;
                        tx.commit()?;
                        Ok(outcome)
                    })
                    .await
                    .map_err(Into::into)
            }
        }
    }

    /// Produce merged content (LLM-assisted when available, otherwise a
    /// deterministic concatenation) and optionally its embedding.
    async fn synthesize_merge(&self, content1: &str, content2: &str) -> (String, Option<Vec<f32>>) {
        let fallback = || format!("{content1}\n\n{content2}");

        let content = match &self.completion {
            Some(llm) => match llm.complete(&merge_prompt(content1, content2)).await {
                Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                Ok(_) => {
                    warn!("[consolidation] empty merge synthesis, concatenating");
                    fallback()
                }
                Err(e) => {
                    warn!("[consolidation] merge synthesis failed, concatenating: {e}");
                    fallback()
                }
            },
            None => fallback(),
        };

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&content).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("[consolidation] merged memory left unembedded: {e}");
                    None
                }
            },
            None => None,
        };

        (content, embedding)
    }

    /// Undo a consolidation rooted at `merged_id` (see
    /// [`undo_consolidation_sync`]).
    pub async fn undo(&self, merged_id: i64) -> Result<UndoOutcome> {
        self.pool
            .interact(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let outcome = undo_consolidation_sync(&tx, merged_id)?;
                tx.commit()?;
                Ok(outcome)
            })
            .await
            .map_err(Into::into)
    }
}

fn merge_prompt(content1: &str, content2: &str) -> String {
    format!(
        "Combine these two overlapping developer memories into one concise memory that preserves \
         every distinct fact. Respond with the merged text only.\n\n\
         Memory A:\n{content1}\n\nMemory B:\n{content2}"
    )
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_effective_enabled_matrix() {
        let base = ConsolidationConfig {
            enabled: true,
            ..ConsolidationConfig::default()
        };
        assert!(base.effective_enabled());

        let project_off = ConsolidationConfig {
            project_override: Some(false),
            ..base.clone()
        };
        assert!(!project_off.effective_enabled(), "explicit project disable wins");

        let global_off = ConsolidationConfig {
            enabled: false,
            project_override: Some(true),
            ..ConsolidationConfig::default()
        };
        assert!(
            !global_off.effective_enabled(),
            "project override cannot defeat a global disable"
        );
    }

    #[test]
    fn test_report_reconciliation() {
        let report = ConsolidationReport {
            candidates_found: 5,
            merged: 1,
            deleted: 2,
            kept: 1,
            errors: vec!["pair (1, 2): boom".to_string()],
        };
        assert!(report.reconciles());

        let torn = ConsolidationReport {
            candidates_found: 5,
            merged: 1,
            ..Default::default()
        };
        assert!(!torn.reconciles());
    }

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::default();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled(), "clones share the flag");
    }
}
