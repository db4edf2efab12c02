//! Hybrid Retrieval
//!
//! Parallel vector + lexical candidate search, merge, memory-level dedup,
//! rule-based rerank, optional cross-encoder rerank behind a three-level
//! cache, and the project-pool degraded workflow with full-corpus fallback.

mod cross_encoder;
mod hybrid;
mod qam;
mod rerank;

pub use cross_encoder::{CrossEncoderReranker, RerankerMetrics, RerankerMetricsSnapshot};
pub use hybrid::HybridSearchService;
pub use qam::{DisabledQueryAttributes, QueryAttributeExtractor, QueryAttributes};
pub use rerank::{recency, RuleReranker, ScoredCandidate};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// A search request as it arrives over the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub include_session_summaries: Option<bool>,
}

/// One ordered search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    /// Record id - a chunk id or a metadata-entry id
    pub id: String,
    pub memory_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Final score the ordering is based on
    pub score: f32,
    pub vector_similarity: f32,
    pub lexical_score: f32,
    pub combined_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// Ordered results plus degradation markers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    /// Present when the cross-encoder layer failed or was skipped under
    /// back-pressure; results degrade to rule-based order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// True when the project-pool pass was insufficient and the full
    /// corpus was consulted.
    pub full_corpus_fallback: bool,
}
