// src/types.rs
// Core data model: memories, links, and scored search results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of fact a memory records.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MemoryType {
    Observation,
    Decision,
    Learning,
    Error,
    Pattern,
}

/// Directed relation between two memories.
///
/// `Supersedes` is reserved for consolidation bookkeeping: an edge
/// `A supersedes B` means B was tombstoned in favor of A.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkRelation {
    Related,
    CausedBy,
    LeadsTo,
    SimilarTo,
    Contradicts,
    Implements,
    Supersedes,
    References,
}

/// Four-way breakdown underlying a scalar quality score. All in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityFactors {
    pub specificity: f32,
    pub clarity: f32,
    pub relevance: f32,
    pub uniqueness: f32,
}

impl QualityFactors {
    /// Neutral factors used when no signal is available.
    pub fn neutral() -> Self {
        Self {
            specificity: 0.5,
            clarity: 0.5,
            relevance: 0.5,
            uniqueness: 0.5,
        }
    }
}

/// A persisted memory record.
///
/// A row with non-null `invalidated_by` is a tombstone: excluded from all
/// active-corpus scans but still addressable by ID for audit and undo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub content: String,
    pub tags: Vec<String>,
    /// Free-text provenance. Consolidation marks synthetic merge products
    /// with [`SYNTHETIC_SOURCE`].
    pub source: Option<String>,
    pub memory_type: Option<MemoryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub quality_score: Option<f32>,
    pub quality_factors: Option<QualityFactors>,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub invalidated_by: Option<i64>,
}

/// Source marker for memories synthesized by the consolidation merge path.
pub const SYNTHETIC_SOURCE: &str = "consolidation-llm";

impl Memory {
    /// True if this memory has been invalidated in favor of another.
    pub fn is_tombstone(&self) -> bool {
        self.invalidated_by.is_some()
    }

    /// True if this memory was synthesized by a consolidation merge.
    pub fn is_synthetic(&self) -> bool {
        self.source.as_deref() == Some(SYNTHETIC_SOURCE)
    }
}

/// A directed, weighted edge between two memories. Never a self-loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub relation: LinkRelation,
    pub weight: f32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub llm_enriched: bool,
}

/// Links touching a memory, split by direction.
#[derive(Debug, Clone, Default)]
pub struct MemoryLinks {
    pub outgoing: Vec<MemoryLink>,
    pub incoming: Vec<MemoryLink>,
}

/// A search hit carrying its (mutable) ranking score.
///
/// `similarity` starts as raw cosine similarity, is replaced by the
/// temporal final score when decay scoring runs, and by the MMR score when
/// diversity reranking runs - so downstream consumers can always re-sort
/// on the same field.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity: f32,
    /// Breakdown from temporal scoring, if it ran.
    pub temporal: Option<crate::decay::TemporalScore>,
}

impl ScoredMemory {
    pub fn new(memory: Memory, similarity: f32) -> Self {
        Self {
            memory,
            similarity,
            temporal: None,
        }
    }
}
