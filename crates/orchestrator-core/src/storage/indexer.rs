//! Indexer: the only write path into both indexes.
//!
//! `index` is atomic from the caller's view: V is written first (one
//! transaction), then L; an L failure compensates by deleting the
//! just-written V ids. A crash mid-write leaves at most V orphans, which
//! the consolidation orphan sweep removes. `delete_by_memory_id` is the
//! only supported deletion path - callers never poke storage directly.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, warn};

use super::{LexicalIndex, VectorRecord, VectorStore};
use crate::error::{CoreError, IngestCause, Result};
use crate::memory::{Chunk, Memory};

/// Coordinated writer over V and L.
pub struct Indexer {
    vector: Arc<VectorStore>,
    lexical: Arc<LexicalIndex>,
    /// Consolidation holds this exclusively for a whole pass; ingestion
    /// and deletion take it shared, so writers never observe
    /// half-migrated state. Readers bypass it entirely.
    maintenance_gate: tokio::sync::RwLock<()>,
}

impl Indexer {
    pub fn new(vector: Arc<VectorStore>, lexical: Arc<LexicalIndex>) -> Self {
        Self {
            vector,
            lexical,
            maintenance_gate: tokio::sync::RwLock::new(()),
        }
    }

    pub fn vector(&self) -> &Arc<VectorStore> {
        &self.vector
    }

    pub fn lexical(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    pub fn maintenance_gate(&self) -> &tokio::sync::RwLock<()> {
        &self.maintenance_gate
    }

    /// Write the metadata entry and all chunk records into V and L.
    /// Returns only after both are durable.
    pub fn index(
        &self,
        memory: &Memory,
        chunks: &[Chunk],
        summary_embedding: Vec<f32>,
    ) -> Result<()> {
        let mut records = Vec::with_capacity(chunks.len() + 1);
        records.push(VectorRecord::for_memory(memory, summary_embedding)?);
        for chunk in chunks {
            records.push(VectorRecord::for_chunk(memory, chunk));
        }
        let record_ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        // V first
        self.vector.upsert_batch(&records).map_err(storage_failure)?;

        // Then L; compensate on failure so no partial state survives
        let lexical_rows: Vec<(String, String, String)> = chunks
            .iter()
            .map(|c| (c.id.clone(), c.memory_id.clone(), c.content.clone()))
            .collect();
        if let Err(e) = self.lexical.insert(&lexical_rows) {
            warn!(memory_id = %memory.id, error = %e, "lexical write failed, compensating");
            if let Err(rollback) = self.vector.delete(&record_ids) {
                // Orphans in V; the consolidation sweep will collect them
                error!(memory_id = %memory.id, error = %rollback, "compensation delete failed");
            }
            return Err(storage_failure(e));
        }
        Ok(())
    }

    /// Cascade delete: metadata entry + V chunks + L chunks. Idempotent.
    pub fn delete_by_memory_id(&self, memory_id: &str) -> Result<()> {
        let mut ids = self.vector.chunk_ids_for_memory(memory_id)?;
        ids.push(crate::memory::metadata_entry_id(memory_id));
        self.vector.delete(&ids)?;
        self.lexical.delete_by_memory_id(memory_id)?;
        Ok(())
    }

    /// Patch the metadata entry only; chunk metadata is not mirrored.
    pub fn update_metadata(&self, memory_id: &str, patch: &Map<String, Value>) -> Result<()> {
        if self.vector.patch_memory_metadata(memory_id, patch)? {
            Ok(())
        } else {
            Err(CoreError::NotFound(memory_id.to_string()))
        }
    }
}

fn storage_failure(e: CoreError) -> CoreError {
    CoreError::IngestFailed {
        cause: IngestCause::Storage,
        message: e.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
