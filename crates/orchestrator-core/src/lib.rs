//! # Orchestrator Core
//!
//! Memory engine for Context Orchestrator - a local-first "external brain"
//! for CLI assistants and editor plug-ins. Three subsystems carry the
//! work:
//!
//! - **Ingestion**: classify, summarise (validated structured summaries),
//!   chunk, embed, and dual-index each conversation.
//! - **Hybrid retrieval**: concurrent vector + BM25 candidate search,
//!   rule-based rerank, cross-encoder rerank behind a three-level cache,
//!   and project-scoped memory pools with full-corpus fallback.
//! - **Consolidation**: scheduled tier migration, similarity clustering
//!   with representative selection, compression, forgetting, and orphan
//!   sweeps across both indexes.
//!
//! Storage is SQLite (vector records + FTS5 lexical index); embeddings are
//! model-backed behind the `embeddings` feature with a deterministic
//! feature-hash fallback; `vector-search` adds a usearch HNSW accelerator.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use orchestrator_core::{
//!     Chunker, Config, Database, HashEmbedder, Indexer, IngestionService,
//!     LanguageDetector, LexicalIndex, LocalReasoner, Router, VectorStore,
//! };
//!
//! # fn main() -> orchestrator_core::Result<()> {
//! let config = Config::load(None)?;
//! config.ensure_layout()?;
//! let db = Arc::new(Database::open(&config.db_path())?);
//! let vector = Arc::new(VectorStore::new(Arc::clone(&db), config.embedder.dimensions)?);
//! let lexical = Arc::new(LexicalIndex::new(db));
//! let ingest = IngestionService::new(
//!     Arc::new(Router::new(LocalReasoner::new(), None)),
//!     Arc::new(HashEmbedder::new(config.embedder.dimensions)),
//!     Arc::new(Indexer::new(vector, lexical)),
//!     Chunker::default(),
//!     LanguageDetector::new(config.language.clone()),
//! );
//! # let _ = ingest;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod chunker;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod language;
pub mod memory;
pub mod pool;
pub mod reasoner;
pub mod registry;
pub mod search;
pub mod session;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use chunker::{count_tokens, Chunker, DEFAULT_MAX_TOKENS};
pub use config::{
    default_data_dir, Config, ConsolidationConfig, EmbedderConfig, LanguageConfig, ProjectConfig,
    RerankWeights, RerankerConfig, SearchConfig, DATA_DIR_ENV, LANG_OVERRIDE_ENV,
};
pub use consolidation::{
    next_fire, ConsolidationScheduler, ConsolidationService, ConsolidationStats, Schedule,
};
pub use embedding::{cosine_similarity, Embedder, HashEmbedder, SharedEmbedder};
#[cfg(feature = "embeddings")]
pub use embedding::FastembedEmbedder;
pub use error::{CoreError, IngestCause, Result, SearchCause};
pub use ingest::IngestionService;
pub use language::{LanguageDetector, LanguageSource};
pub use memory::{
    chunk_id, memory_id_of, metadata_entry_id, Chunk, ConversationInput, Memory, Schema,
    SourceKind, StructuredSummary, SummaryParseError, Tier,
};
pub use pool::{ProjectPool, ProjectPoolManager};
pub use reasoner::{
    ExternalReasoner, LocalReasoner, ReasonerTask, Route, Router, RouterMetrics,
    RouterMetricsSnapshot, INTERNAL_ENV_FLAG,
};
pub use registry::{Bookmark, BookmarkStore, ProjectRecord, ProjectsRegistry};
pub use search::{
    CrossEncoderReranker, DisabledQueryAttributes, HybridSearchService, QueryAttributeExtractor,
    RerankerMetrics, RerankerMetricsSnapshot, RuleReranker, SearchRequest, SearchResponse,
    SearchResultItem,
};
pub use session::{ProjectHint, Session, SessionEvent, SessionManager};
pub use storage::{
    sanitize_fts5_query, ConsolidationHistoryRecord, Database, Indexer, LexicalHit, LexicalIndex,
    MetadataFilter, VectorHit, VectorRecord, VectorStore,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model when the `embeddings` feature is active.
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-ai/nomic-embed-text-v1.5";
