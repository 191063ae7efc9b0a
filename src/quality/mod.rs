// src/quality/mod.rs
// Confidence-weighted quality scoring with three modes:
// heuristic (always available, offline), local classifier, and API.
// Every escalated mode degrades back to the heuristic result on failure.

pub mod heuristics;

use crate::error::{EngramError, Result};
use crate::mmr::cosine_similarity;
use crate::providers::{Classifier, CompletionClient, Embedder, LabelPair};
use crate::types::QualityFactors;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// How quality scores are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    Heuristic,
    Local,
    Api,
}

/// A confidence-weighted quality estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScore {
    pub score: f32,
    pub confidence: f32,
    pub factors: QualityFactors,
    pub mode: QualityMode,
}

impl QualityScore {
    /// Neutral default returned when the API path cannot produce a
    /// usable answer.
    fn neutral(mode: QualityMode) -> Self {
        Self {
            score: 0.5,
            confidence: 0.3,
            factors: QualityFactors::neutral(),
            mode,
        }
    }
}

/// Whether a score clears a configured acceptance threshold.
pub fn passes_threshold(score: &QualityScore, threshold: f32) -> bool {
    score.score >= threshold
}

/// Configuration for quality scoring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub mode: QualityMode,
    /// Minimum acceptable score for save-path gating.
    pub threshold: f32,
    /// Heuristic specificity below this skips the local classifier call.
    pub classifier_gate: f32,
    /// Refine uncertain heuristic specificity via reference-phrase
    /// embedding similarity (raise-only).
    pub embedding_refinement: bool,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            mode: QualityMode::Heuristic,
            threshold: 0.3,
            classifier_gate: 0.4,
            embedding_refinement: true,
        }
    }
}

// Factor weights per mode. Heuristic mode splits evenly between the two
// observable factors and the two defaulted ones; local mode shifts weight
// onto the classifier-backed factors.
const HEURISTIC_WEIGHTS: [f32; 4] = [0.3, 0.3, 0.2, 0.2];
const LOCAL_WEIGHTS: [f32; 4] = [0.35, 0.15, 0.25, 0.25];
const HEURISTIC_CONFIDENCE: f32 = 0.6;
const LOCAL_CONFIDENCE: f32 = 0.85;

/// Cap on how far the classifier may pull specificity above the
/// heuristic estimate.
const CLASSIFIER_SPECIFICITY_HEADROOM: f32 = 0.15;

fn weighted(factors: &QualityFactors, weights: &[f32; 4]) -> f32 {
    (factors.specificity * weights[0]
        + factors.clarity * weights[1]
        + factors.relevance * weights[2]
        + factors.uniqueness * weights[3])
        .clamp(0.0, 1.0)
}

/// Reference phrases with known-high and known-low specificity, used to
/// refine uncertain heuristic estimates via embedding similarity.
const HIGH_SPECIFICITY_REFS: [&str; 3] = [
    "Fixed race condition in the connection pool by adding a mutex around checkout in pool.rs:84",
    "The API returns HTTP 429 once the rate limit of 100 requests per minute is exceeded",
    "Run cargo clippy --fix before committing to the release branch",
];
const LOW_SPECIFICITY_REFS: [&str; 3] = [
    "That seems fine to me",
    "We talked about some stuff earlier",
    "It might work better now, probably",
];

/// Pre-embedded reference phrase sets.
struct ReferenceEmbeddings {
    high: Vec<Vec<f32>>,
    low: Vec<Vec<f32>>,
}

/// Lazily-built cache for the reference embeddings. Explicit object with
/// `get()`/`invalidate()` rather than module state, so tests and
/// multi-tenant callers stay isolated.
#[derive(Default)]
pub struct ReferencePhraseCache {
    inner: tokio::sync::RwLock<Option<Arc<ReferenceEmbeddings>>>,
}

impl ReferencePhraseCache {
    async fn get(&self, embedder: &dyn Embedder) -> Result<Arc<ReferenceEmbeddings>> {
        if let Some(cached) = self.inner.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let mut guard = self.inner.write().await;
        // Another task may have filled it while we waited for the lock
        if let Some(cached) = guard.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let high_texts: Vec<String> =
            HIGH_SPECIFICITY_REFS.iter().map(|s| s.to_string()).collect();
        let low_texts: Vec<String> =
            LOW_SPECIFICITY_REFS.iter().map(|s| s.to_string()).collect();
        let (high, low) = futures::future::try_join(
            embedder.embed_batch(&high_texts),
            embedder.embed_batch(&low_texts),
        )
        .await?;
        let built = Arc::new(ReferenceEmbeddings { high, low });
        *guard = Some(Arc::clone(&built));
        Ok(built)
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

/// Quality scorer over optional external signal providers.
pub struct QualityScorer {
    config: QualityConfig,
    classifier: Option<Arc<dyn Classifier>>,
    completion: Option<Arc<dyn CompletionClient>>,
    embedder: Option<Arc<dyn Embedder>>,
    reference_cache: ReferencePhraseCache,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            classifier: None,
            completion: None,
            embedder: None,
            reference_cache: ReferencePhraseCache::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Invalidate cached reference embeddings (e.g. after swapping the
    /// embedding model).
    pub async fn invalidate_caches(&self) {
        self.reference_cache.invalidate().await;
    }

    /// Score with the configured mode, falling back down the chain when
    /// a mode's provider is missing.
    pub async fn score(&self, content: &str, existing_similarity: Option<f32>) -> QualityScore {
        match self.config.mode {
            QualityMode::Api if self.completion.is_some() => self.score_with_api(content).await,
            QualityMode::Local if self.classifier.is_some() => {
                self.score_with_local(content, existing_similarity).await
            }
            _ => {
                let mut score = self.score_with_heuristics(content, existing_similarity);
                score = self.refine_with_embeddings(content, score).await;
                score
            }
        }
    }

    /// Rule-based scoring. Always available, no I/O.
    ///
    /// Relevance is fixed at 0.5 (no external signal); uniqueness comes
    /// from a supplied duplicate-candidate similarity when available.
    pub fn score_with_heuristics(
        &self,
        content: &str,
        existing_similarity: Option<f32>,
    ) -> QualityScore {
        let factors = QualityFactors {
            specificity: heuristics::specificity(content),
            clarity: heuristics::clarity(content),
            relevance: 0.5,
            uniqueness: existing_similarity.map_or(0.5, |s| (1.0 - s).clamp(0.0, 1.0)),
        };
        QualityScore {
            score: weighted(&factors, &HEURISTIC_WEIGHTS),
            confidence: HEURISTIC_CONFIDENCE,
            factors,
            mode: QualityMode::Heuristic,
        }
    }

    /// Heuristics gated by a local zero-shot classifier.
    ///
    /// Content the heuristics already rate as unspecific skips the model
    /// call entirely. On classifier failure this degrades to the plain
    /// heuristic result.
    pub async fn score_with_local(
        &self,
        content: &str,
        existing_similarity: Option<f32>,
    ) -> QualityScore {
        let heuristic = self.score_with_heuristics(content, existing_similarity);

        if heuristic.factors.specificity < self.config.classifier_gate {
            debug!(
                "[quality] specificity {:.2} below gate, skipping classifier",
                heuristic.factors.specificity
            );
            return QualityScore {
                mode: QualityMode::Local,
                ..heuristic
            };
        }

        let Some(classifier) = self.classifier.as_ref() else {
            return heuristic;
        };

        let pairs = [
            LabelPair {
                positive: "specific technical detail",
                negative: "vague general statement",
            },
            LabelPair {
                positive: "software development related",
                negative: "not related to software development",
            },
        ];

        match classifier.classify(content, &pairs).await {
            Ok(scores) if scores.len() == 2 => {
                let factors = QualityFactors {
                    specificity: scores[0].min(
                        heuristic.factors.specificity + CLASSIFIER_SPECIFICITY_HEADROOM,
                    ),
                    clarity: heuristic.factors.clarity,
                    relevance: scores[1],
                    uniqueness: heuristic.factors.uniqueness,
                };
                QualityScore {
                    score: weighted(&factors, &LOCAL_WEIGHTS),
                    confidence: LOCAL_CONFIDENCE,
                    factors,
                    mode: QualityMode::Local,
                }
            }
            Ok(scores) => {
                warn!(
                    "[quality] classifier returned {} scores for 2 label pairs, using heuristics",
                    scores.len()
                );
                heuristic
            }
            Err(e) => {
                warn!("[quality] classifier failed, using heuristics: {e}");
                heuristic
            }
        }
    }

    /// LLM-based scoring with a fixed prompt.
    ///
    /// Any transport or parse failure yields a neutral default rather
    /// than an error - quality scoring must never take down a save path.
    pub async fn score_with_api(&self, content: &str) -> QualityScore {
        let Some(completion) = self.completion.as_ref() else {
            return QualityScore::neutral(QualityMode::Api);
        };

        let prompt = scoring_prompt(content);
        let response = match completion.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("[quality] API scoring failed, returning neutral: {e}");
                return QualityScore::neutral(QualityMode::Api);
            }
        };

        match parse_api_response(&response) {
            Ok(score) => score,
            Err(e) => {
                warn!("[quality] unparseable API score response, returning neutral: {e}");
                QualityScore::neutral(QualityMode::Api)
            }
        }
    }

    /// When heuristic specificity is uncertain, compare the content's
    /// embedding against the high/low reference sets and take the better
    /// of the two estimates. Never lowers the score.
    async fn refine_with_embeddings(&self, content: &str, score: QualityScore) -> QualityScore {
        if !self.config.embedding_refinement || score.factors.specificity >= 0.5 {
            return score;
        }
        let Some(embedder) = self.embedder.as_ref() else {
            return score;
        };

        let refined = match self.embedding_specificity(embedder.as_ref(), content).await {
            Ok(v) => v,
            Err(e) => {
                debug!("[quality] embedding refinement unavailable: {e}");
                return score;
            }
        };

        if refined <= score.factors.specificity {
            return score;
        }

        let factors = QualityFactors {
            specificity: refined,
            ..score.factors
        };
        QualityScore {
            score: weighted(&factors, &HEURISTIC_WEIGHTS),
            factors,
            ..score
        }
    }

    /// Normalized ratio of mean similarity to the high-specificity set
    /// versus both sets.
    async fn embedding_specificity(&self, embedder: &dyn Embedder, content: &str) -> Result<f32> {
        let refs = self.reference_cache.get(embedder).await?;
        let embedding = embedder.embed(content).await?;

        let mean = |set: &[Vec<f32>]| -> f32 {
            if set.is_empty() {
                return 0.0;
            }
            set.iter().map(|r| cosine_similarity(&embedding, r)).sum::<f32>() / set.len() as f32
        };

        let high = mean(&refs.high).max(0.0);
        let low = mean(&refs.low).max(0.0);
        if high + low == 0.0 {
            return Ok(0.0);
        }
        Ok((high / (high + low)).clamp(0.0, 1.0))
    }
}

fn scoring_prompt(content: &str) -> String {
    format!(
        "Rate the following developer memory for long-term usefulness.\n\
         Respond with a single JSON object:\n\
         {{\"score\": 0.0-1.0, \"confidence\": 0.0-1.0, \"factors\": {{\"specificity\": 0.0-1.0, \
         \"clarity\": 0.0-1.0, \"relevance\": 0.0-1.0, \"uniqueness\": 0.0-1.0}}}}\n\n\
         Memory:\n{content}"
    )
}

#[derive(Debug, Deserialize)]
struct ApiFactors {
    #[serde(default = "default_factor")]
    specificity: f32,
    #[serde(default = "default_factor")]
    clarity: f32,
    #[serde(default = "default_factor")]
    relevance: f32,
    #[serde(default = "default_factor")]
    uniqueness: f32,
}

#[derive(Debug, Deserialize)]
struct ApiPayload {
    score: f32,
    #[serde(default = "default_factor")]
    confidence: f32,
    factors: Option<ApiFactors>,
}

fn default_factor() -> f32 {
    0.5
}

/// Parse the first balanced JSON object out of an LLM response that may
/// wrap it in prose or markdown fencing.
fn parse_api_response(response: &str) -> Result<QualityScore> {
    let block = extract_json_block(response)
        .ok_or_else(|| EngramError::InvalidInput("no JSON object in response".to_string()))?;
    let payload: ApiPayload = serde_json::from_str(block)?;

    let factors = payload
        .factors
        .map(|f| QualityFactors {
            specificity: f.specificity.clamp(0.0, 1.0),
            clarity: f.clarity.clamp(0.0, 1.0),
            relevance: f.relevance.clamp(0.0, 1.0),
            uniqueness: f.uniqueness.clamp(0.0, 1.0),
        })
        .unwrap_or_else(QualityFactors::neutral);

    Ok(QualityScore {
        score: payload.score.clamp(0.0, 1.0),
        confidence: payload.confidence.clamp(0.0, 1.0),
        factors,
        mode: QualityMode::Api,
    })
}

/// First balanced `{...}` block in `text`, tolerant of braces inside
/// JSON strings.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod heuristic_mode_tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        let scorer = QualityScorer::new(QualityConfig::default());
        for content in ["", "ok", "The indexer flushes pending embeddings in batches of 50."] {
            let s = scorer.score_with_heuristics(content, None);
            assert!((0.0..=1.0).contains(&s.score), "score out of bounds for {content:?}");
            for f in [
                s.factors.specificity,
                s.factors.clarity,
                s.factors.relevance,
                s.factors.uniqueness,
            ] {
                assert!((0.0..=1.0).contains(&f));
            }
        }
    }

    #[test]
    fn test_heuristic_confidence_and_mode() {
        let scorer = QualityScorer::new(QualityConfig::default());
        let s = scorer.score_with_heuristics("some content here", None);
        assert_eq!(s.mode, QualityMode::Heuristic);
        assert!((s.confidence - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_uniqueness_from_existing_similarity() {
        let scorer = QualityScorer::new(QualityConfig::default());
        let dup = scorer.score_with_heuristics("content", Some(0.9));
        let fresh = scorer.score_with_heuristics("content", Some(0.1));
        assert!((dup.factors.uniqueness - 0.1).abs() < 1e-6);
        assert!((fresh.factors.uniqueness - 0.9).abs() < 1e-6);
        let unknown = scorer.score_with_heuristics("content", None);
        assert_eq!(unknown.factors.uniqueness, 0.5);
    }

    #[test]
    fn test_passes_threshold() {
        let score = QualityScore::neutral(QualityMode::Heuristic);
        assert!(passes_threshold(&score, 0.5));
        assert!(!passes_threshold(&score, 0.51));
    }
}



#[cfg(test)]
mod json_extraction_tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        assert_eq!(extract_json_block("{\"a\": 1}"), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_nested_objects() {
        let text = "prefix {\"a\": {\"b\": 2}} suffix";
        assert_eq!(extract_json_block(text), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = "{\"note\": \"uses {braces} inside\"}";
        assert_eq!(extract_json_block(text), Some(text));
    }

    #[test]
    fn test_no_object() {
        assert_eq!(extract_json_block("no json here"), None);
        assert_eq!(extract_json_block("{ unclosed"), None);
    }
}
