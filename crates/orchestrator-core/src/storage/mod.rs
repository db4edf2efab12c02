//! Storage
//!
//! SQLite is the durable substrate for both indexes:
//!
//! - Vector store V: `vector_records` (embeddings as BLOBs, open metadata
//!   as JSON) with an optional HNSW accelerator and an exact-scan fallback.
//! - Lexical index L: FTS5 over chunk text with `bm25()` ranking.
//!
//! Rows in L are written and deleted explicitly by the `Indexer` - never by
//! triggers - because consolidation mutates L independently of V.

mod indexer;
mod lexical;
mod sqlite;
mod vector;

pub use indexer::Indexer;
pub use lexical::{sanitize_fts5_query, LexicalHit, LexicalIndex};
pub use sqlite::{ConsolidationHistoryRecord, Database};
pub use vector::{MetadataFilter, VectorHit, VectorRecord, VectorStore};
