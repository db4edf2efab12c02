//! Memory Records
//!
//! The durable data model: a `Memory` is one ingested conversation,
//! persisted across both indexes as a metadata entry plus a sequence of
//! token-bounded chunks.

mod record;
pub mod summary;

pub use record::{
    chunk_id, memory_id_of, metadata_entry_id, Chunk, ConversationInput, Memory, Schema,
    SourceKind, Tier, METADATA_SUFFIX,
};
pub use summary::{StructuredSummary, SummaryParseError};
