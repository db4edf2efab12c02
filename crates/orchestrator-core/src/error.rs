//! Error Taxonomy
//!
//! Every service boundary returns `Result<T, CoreError>`. The variants map
//! one-to-one onto the error kinds surfaced over JSON-RPC; internal causes
//! are preserved so the transport layer can attach a `kind` datum without
//! leaking stack traces to the client.

use thiserror::Error;

/// Which ingestion stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestCause {
    Classification,
    Summary,
    Embedding,
    Storage,
}

impl IngestCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestCause::Classification => "classification",
            IngestCause::Summary => "summary",
            IngestCause::Embedding => "embedding",
            IngestCause::Storage => "storage",
        }
    }
}

/// Which retrieval stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCause {
    Embedding,
    Vector,
    Lexical,
    Rerank,
}

impl SearchCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchCause::Embedding => "embedding",
            SearchCause::Vector => "vector",
            SearchCause::Lexical => "lexical",
            SearchCause::Rerank => "rerank",
        }
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed request or schema violation. Surfaced; never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Memory or session id not known.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ingestion failed at a specific stage; partial state is rolled back.
    #[error("Ingestion failed ({}): {message}", cause.as_str())]
    IngestFailed { cause: IngestCause, message: String },

    /// Retrieval failed at a specific stage. Cross-encoder failures never
    /// take this path; they degrade to rule-based order instead.
    #[error("Search failed ({}): {message}", cause.as_str())]
    SearchFailed { cause: SearchCause, message: String },

    /// Deadline exceeded; partial results discarded.
    #[error("Deadline exceeded")]
    Timeout,

    /// Consolidation pass failed; state remains recoverable.
    #[error("Consolidation failed: {0}")]
    Consolidation(String),

    /// Storage layer error.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error (data directory, state files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Initialization error (config, data layout, model load).
    #[error("Initialization error: {0}")]
    Init(String),
}

impl CoreError {
    /// Stable kind name attached to JSON-RPC error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidRequest(_) => "InvalidRequest",
            CoreError::NotFound(_) => "NotFound",
            CoreError::IngestFailed { .. } => "IngestFailed",
            CoreError::SearchFailed { .. } => "SearchFailed",
            CoreError::Timeout => "Timeout",
            CoreError::Consolidation(_) => "ConsolidationError",
            CoreError::Storage(_) | CoreError::Io(_) | CoreError::Json(_) | CoreError::Init(_) => {
                "Internal"
            }
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// TESTS
// ============================================================================
