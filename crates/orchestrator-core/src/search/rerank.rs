//! Rule-based reranker.
//!
//! Weighted linear blend over memory strength, tier-aware recency, capped
//! reference share, normalised lexical score, vector similarity, and a
//! bounded metadata bonus. Chunks and metadata entries score uniformly -
//! the dedup step upstream guarantees one representative per memory.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::qam::{QueryAttributeExtractor, QueryAttributes};
use crate::config::RerankWeights;
use crate::memory::{Memory, Tier};
use crate::storage::VectorRecord;

/// References beyond this count stop adding signal.
pub const REFS_CAP: usize = 5;

/// Metadata bonus saturates after this many attribute matches.
const METADATA_BONUS_PER_MATCH: f32 = 0.34;

/// A merged candidate flowing through the rerank stages.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub record: VectorRecord,
    /// Parent memory, loaded during dedup
    pub memory: Memory,
    pub vector_similarity: f32,
    /// Raw BM25 score; 0 when the candidate only surfaced in V
    pub lexical_score: f32,
    /// Lexical score scaled into [0, 1] against the candidate set maximum
    pub normalized_lexical: f32,
    /// Rule-based blend output
    pub combined_score: f32,
    /// Cross-encoder output, when that stage ran
    pub rerank_score: Option<f32>,
    /// Final ordering key
    pub final_score: f32,
}

/// Tier-specific recency decay: long-term memories decay more slowly.
/// Monotonically decreasing in [0, 1].
pub fn recency(age_days: f64, tier: Tier) -> f32 {
    let lambda = match tier {
        Tier::Working => 0.12,
        Tier::ShortTerm => 0.05,
        Tier::LongTerm => 0.01,
    };
    (-lambda * age_days.max(0.0)).exp() as f32
}

/// The rule-based scoring stage.
pub struct RuleReranker {
    weights: RerankWeights,
    attributes: Arc<dyn QueryAttributeExtractor>,
}

impl RuleReranker {
    pub fn new(weights: RerankWeights, attributes: Arc<dyn QueryAttributeExtractor>) -> Self {
        Self {
            weights,
            attributes,
        }
    }

    pub fn weights(&self) -> &RerankWeights {
        &self.weights
    }

    /// Score every candidate in place and sort by descending combined
    /// score with the deterministic memory-id tie-break.
    pub fn rerank(&self, query: &str, candidates: &mut [ScoredCandidate], now: DateTime<Utc>) {
        // QAM is policy-disabled; this is None and the bonus path is free
        let attrs = self.attributes.extract(query);

        for candidate in candidates.iter_mut() {
            candidate.combined_score = self.score(candidate, now, attrs.as_ref());
            candidate.final_score = candidate.combined_score;
        }
        sort_candidates(candidates);
    }

    fn score(
        &self,
        candidate: &ScoredCandidate,
        now: DateTime<Utc>,
        attrs: Option<&QueryAttributes>,
    ) -> f32 {
        let memory = &candidate.memory;
        let w = &self.weights;

        let age_days = (now - memory.timestamp).num_seconds() as f64 / 86_400.0;
        let refs_share = memory.refs.len().min(REFS_CAP) as f32 / REFS_CAP as f32;
        let bonus = metadata_bonus(attrs, &candidate.record.metadata);

        w.strength * memory.strength as f32
            + w.recency * recency(age_days, memory.tier)
            + w.refs * refs_share
            + w.lexical * candidate.normalized_lexical
            + w.vector * candidate.vector_similarity
            + w.metadata * bonus
    }
}

/// Small positive contribution when metadata keys align with extracted
/// query attributes; capped so the bonus never dominates.
fn metadata_bonus(attrs: Option<&QueryAttributes>, metadata: &Map<String, Value>) -> f32 {
    let Some(attrs) = attrs else {
        return 0.0;
    };
    let matches = attrs
        .iter()
        .filter(|(key, value)| {
            metadata.get(*key).and_then(Value::as_str) == Some(value.as_str())
        })
        .count();
    (matches as f32 * METADATA_BONUS_PER_MATCH).min(1.0)
}

/// Descending final score; ties break on lexicographic memory id.
pub(crate) fn sort_candidates(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Schema, StructuredSummary};
    use crate::search::qam::DisabledQueryAttributes;

    fn memory(id: &str, tier: Tier, strength: f64, refs: usize, age_days: i64) -> Memory {
        let timestamp = Utc::now() - chrono::Duration::days(age_days);
        Memory {
            id: id.to_string(),
            schema: Schema::Process,
            tier,
            content: "content".into(),
            summary: StructuredSummary {
                topic: "t".into(),
                doc_type: "process".into(),
                project: "Unknown".into(),
                key_actions: vec!["Do".into()],
            },
            refs: (0..refs).map(|i| format!("ref{}", i)).collect(),
            timestamp,
            last_accessed: timestamp,
            access_count: 0,
            importance: 0.5,
            strength,
            project_id: None,
            language: "en".into(),
            metadata: Map::new(),
            compressed_into: None,
        }
    }

    fn candidate(id: &str, vector: f32, lexical: f32, memory: Memory) -> ScoredCandidate {
        ScoredCandidate {
            record: VectorRecord {
                id: format!("{}-metadata", id),
                memory_id: id.to_string(),
                is_memory_entry: true,
                document: String::new(),
                embedding: vec![],
                metadata: Map::new(),
            },
            memory,
            vector_similarity: vector,
            lexical_score: lexical,
            normalized_lexical: lexical,
            combined_score: 0.0,
            rerank_score: None,
            final_score: 0.0,
        }
    }

    fn reranker() -> RuleReranker {
        RuleReranker::new(RerankWeights::default(), Arc::new(DisabledQueryAttributes))
    }

    #[test]
    fn recency_is_monotonic_and_tiered() {
        assert!(recency(0.0, Tier::Working) > recency(5.0, Tier::Working));
        assert!(recency(5.0, Tier::Working) > recency(30.0, Tier::Working));
        // Long-term decays slower than working at the same age
        assert!(recency(30.0, Tier::LongTerm) > recency(30.0, Tier::Working));
        assert!(recency(0.0, Tier::Working) <= 1.0);
        assert!(recency(10_000.0, Tier::Working) >= 0.0);
    }

    #[test]
    fn vector_similarity_dominates_with_default_weights() {
        let mut candidates = vec![
            candidate("low", 0.1, 0.0, memory("low", Tier::Working, 0.5, 0, 0)),
            candidate("high", 0.9, 0.0, memory("high", Tier::Working, 0.5, 0, 0)),
        ];
        reranker().rerank("query", &mut candidates, Utc::now());
        assert_eq!(candidates[0].memory.id, "high");
    }

    #[test]
    fn ties_break_on_memory_id() {
        let mut candidates = vec![
            candidate("bbb", 0.5, 0.0, memory("bbb", Tier::Working, 0.5, 0, 0)),
            candidate("aaa", 0.5, 0.0, memory("aaa", Tier::Working, 0.5, 0, 0)),
        ];
        reranker().rerank("query", &mut candidates, Utc::now());
        assert_eq!(candidates[0].memory.id, "aaa");
        assert_eq!(candidates[1].memory.id, "bbb");
    }

    #[test]
    fn refs_contribution_is_capped() {
        let now = Utc::now();
        let reranker = reranker();
        let mut few = vec![candidate(
            "m",
            0.0,
            0.0,
            memory("m", Tier::Working, 0.0, REFS_CAP, 0),
        )];
        let mut many = vec![candidate(
            "m",
            0.0,
            0.0,
            memory("m", Tier::Working, 0.0, REFS_CAP * 3, 0),
        )];
        reranker.rerank("q", &mut few, now);
        reranker.rerank("q", &mut many, now);
        assert!((few[0].combined_score - many[0].combined_score).abs() < 1e-6);
    }

    #[test]
    fn deterministic_rerank() {
        let now = Utc::now();
        let build = || {
            vec![
                candidate("a", 0.4, 1.0, memory("a", Tier::Working, 0.9, 2, 1)),
                candidate("b", 0.7, 0.2, memory("b", Tier::ShortTerm, 0.3, 0, 10)),
                candidate("c", 0.6, 0.6, memory("c", Tier::LongTerm, 0.6, 5, 100)),
            ]
        };
        let mut first = build();
        let mut second = build();
        let reranker = reranker();
        reranker.rerank("q", &mut first, now);
        reranker.rerank("q", &mut second, now);
        let order: Vec<&str> = first.iter().map(|c| c.memory.id.as_str()).collect();
        let order2: Vec<&str> = second.iter().map(|c| c.memory.id.as_str()).collect();
        assert_eq!(order, order2);
    }

    #[test]
    fn metadata_bonus_requires_attributes() {
        let mut metadata = Map::new();
        metadata.insert("schema".into(), Value::String("incident".into()));
        assert_eq!(metadata_bonus(None, &metadata), 0.0);

        let mut attrs = QueryAttributes::new();
        attrs.insert("schema".into(), "incident".into());
        let bonus = metadata_bonus(Some(&attrs), &metadata);
        assert!(bonus > 0.0 && bonus <= 1.0);
    }

    #[test]
    fn metadata_bonus_is_capped() {
        let mut metadata = Map::new();
        let mut attrs = QueryAttributes::new();
        for i in 0..10 {
            metadata.insert(format!("k{}", i), Value::String("v".into()));
            attrs.insert(format!("k{}", i), "v".into());
        }
        assert!((metadata_bonus(Some(&attrs), &metadata) - 1.0).abs() < 1e-6);
    }
}
