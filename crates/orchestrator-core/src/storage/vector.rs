//! Vector store V.
//!
//! Each record: id, dense embedding, document string, open metadata map.
//! Per memory there is one metadata entry (`{id}-metadata`, embedding from
//! the structured summary, `is_memory_entry=true`) and N chunk records
//! (`{id}#i`, embeddings from chunk text, `is_memory_entry=false`).
//!
//! Querying runs an exact cosine scan over SQLite rows; with the
//! `vector-search` feature an in-process HNSW index (usearch) accelerates
//! unfiltered queries, over-fetching and re-hydrating records by id.
//! SQLite is the source of truth either way - the HNSW index is rebuilt
//! from rows at startup.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::{Map, Value};

use super::sqlite::Database;
use crate::embedding::{cosine_similarity, vector_from_bytes, vector_to_bytes};
use crate::error::{CoreError, Result};
use crate::memory::{metadata_entry_id, Chunk, Memory};

// ============================================================================
// RECORD
// ============================================================================

/// One row of the vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub memory_id: String,
    pub is_memory_entry: bool,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

impl VectorRecord {
    /// Metadata entry for a memory; the embedding comes from the summary.
    pub fn for_memory(memory: &Memory, embedding: Vec<f32>) -> Result<Self> {
        let mut metadata = match serde_json::to_value(memory)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        metadata.insert("is_memory_entry".to_string(), Value::Bool(true));
        Ok(Self {
            id: memory.metadata_entry_id(),
            memory_id: memory.id.clone(),
            is_memory_entry: true,
            document: memory.summary.to_string(),
            embedding,
            metadata,
        })
    }

    /// Chunk record; inherits schema, tier, project and timestamp.
    pub fn for_chunk(memory: &Memory, chunk: &Chunk) -> Self {
        let mut metadata = Map::new();
        metadata.insert("is_memory_entry".to_string(), Value::Bool(false));
        metadata.insert("memory_id".to_string(), Value::String(memory.id.clone()));
        metadata.insert(
            "chunk_index".to_string(),
            Value::Number(chunk.chunk_index.into()),
        );
        metadata.insert(
            "schema".to_string(),
            Value::String(memory.schema.as_str().to_string()),
        );
        metadata.insert(
            "tier".to_string(),
            Value::String(memory.tier.as_str().to_string()),
        );
        if let Some(project) = &memory.project_id {
            metadata.insert("project_id".to_string(), Value::String(project.clone()));
        }
        metadata.insert(
            "timestamp".to_string(),
            Value::String(memory.timestamp.to_rfc3339()),
        );
        Self {
            id: chunk.id.clone(),
            memory_id: memory.id.clone(),
            is_memory_entry: false,
            document: chunk.content.clone(),
            embedding: chunk.embedding.clone(),
            metadata,
        }
    }

    /// Recover the full memory from a metadata-entry record.
    pub fn to_memory(&self) -> Result<Memory> {
        if !self.is_memory_entry {
            return Err(CoreError::Init(format!(
                "record {} is not a metadata entry",
                self.id
            )));
        }
        let memory: Memory = serde_json::from_value(Value::Object(self.metadata.clone()))?;
        Ok(memory)
    }
}

/// A scored query hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub record: VectorRecord,
    pub similarity: f32,
}

// ============================================================================
// METADATA FILTER
// ============================================================================

/// Equality bag over record metadata. Multiple keys conjoin; an `$and`
/// array expresses the same thing explicitly.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    clauses: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a filter value from a request.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let object = value.as_object().ok_or_else(|| {
            CoreError::InvalidRequest("filters must be a JSON object".to_string())
        })?;

        let mut clauses = Vec::new();
        for (key, val) in object {
            if key == "$and" {
                let array = val.as_array().ok_or_else(|| {
                    CoreError::InvalidRequest("$and must be an array of objects".to_string())
                })?;
                for entry in array {
                    let inner = entry.as_object().ok_or_else(|| {
                        CoreError::InvalidRequest("$and entries must be objects".to_string())
                    })?;
                    for (k, v) in inner {
                        clauses.push((k.clone(), v.clone()));
                    }
                }
            } else {
                clauses.push((key.clone(), val.clone()));
            }
        }
        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.clauses
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

// ============================================================================
// HNSW ACCELERATOR (feature-gated)
// ============================================================================

#[cfg(feature = "vector-search")]
mod ann {
    use std::collections::HashMap;

    use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

    use crate::error::{CoreError, Result};

    /// HNSW index with string-key bookkeeping.
    pub struct AnnIndex {
        index: Index,
        key_to_id: HashMap<String, u64>,
        id_to_key: HashMap<u64, String>,
        next_id: u64,
    }

    impl AnnIndex {
        pub fn new(dimensions: usize) -> Result<Self> {
            let options = IndexOptions {
                dimensions,
                metric: MetricKind::Cos,
                quantization: ScalarKind::F32,
                connectivity: 16,
                expansion_add: 128,
                expansion_search: 64,
                multi: false,
            };
            let index = Index::new(&options)
                .map_err(|e| CoreError::Init(format!("HNSW index creation failed: {}", e)))?;
            Ok(Self {
                index,
                key_to_id: HashMap::new(),
                id_to_key: HashMap::new(),
                next_id: 0,
            })
        }

        pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<()> {
            if let Some(&existing) = self.key_to_id.get(key) {
                self.index.remove(existing).ok();
            }
            if self.index.size() >= self.index.capacity() {
                let capacity = (self.index.capacity() * 2).max(64);
                self.index
                    .reserve(capacity)
                    .map_err(|e| CoreError::Init(format!("HNSW reserve failed: {}", e)))?;
            }
            let id = *self.key_to_id.entry(key.to_string()).or_insert_with(|| {
                let id = self.next_id;
                self.next_id += 1;
                id
            });
            self.id_to_key.insert(id, key.to_string());
            self.index
                .add(id, vector)
                .map_err(|e| CoreError::Init(format!("HNSW add failed: {}", e)))?;
            Ok(())
        }

        pub fn remove(&mut self, key: &str) {
            if let Some(id) = self.key_to_id.remove(key) {
                self.id_to_key.remove(&id);
                self.index.remove(id).ok();
            }
        }

        /// Nearest keys with cosine similarity (1 - distance).
        pub fn search(&self, vector: &[f32], count: usize) -> Vec<(String, f32)> {
            let Ok(matches) = self.index.search(vector, count) else {
                return Vec::new();
            };
            matches
                .keys
                .iter()
                .zip(matches.distances.iter())
                .filter_map(|(id, distance)| {
                    self.id_to_key
                        .get(id)
                        .map(|key| (key.clone(), 1.0 - distance))
                })
                .collect()
        }
    }
}

// ============================================================================
// VECTOR STORE
// ============================================================================

/// The vector store over SQLite.
pub struct VectorStore {
    db: Arc<Database>,
    #[cfg(feature = "vector-search")]
    ann: std::sync::Mutex<ann::AnnIndex>,
}

impl VectorStore {
    pub fn new(db: Arc<Database>, dimensions: usize) -> Result<Self> {
        #[cfg(feature = "vector-search")]
        {
            let mut index = ann::AnnIndex::new(dimensions)?;
            // Rebuild the accelerator from rows; SQLite is the truth.
            db.with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT id, embedding FROM vector_records")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                for row in rows {
                    let (id, bytes) = row?;
                    if let Some(vector) = vector_from_bytes(&bytes) {
                        index.add(&id, &vector)?;
                    }
                }
                Ok(())
            })?;
            Ok(Self {
                db,
                ann: std::sync::Mutex::new(index),
            })
        }
        #[cfg(not(feature = "vector-search"))]
        {
            let _ = dimensions;
            Ok(Self { db })
        }
    }

    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert or replace a batch of records in one transaction.
    pub fn upsert_batch(&self, records: &[VectorRecord]) -> Result<()> {
        self.db.with_tx(|tx| {
            for record in records {
                Self::upsert_one(tx, record)?;
            }
            Ok(())
        })?;
        #[cfg(feature = "vector-search")]
        {
            let mut ann = self.ann_lock()?;
            for record in records {
                ann.add(&record.id, &record.embedding)?;
            }
        }
        Ok(())
    }

    fn upsert_one(tx: &rusqlite::Transaction<'_>, record: &VectorRecord) -> Result<()> {
        let tier = record
            .metadata
            .get("tier")
            .and_then(Value::as_str)
            .unwrap_or("working")
            .to_string();
        let timestamp = record
            .metadata
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        let project_id = record
            .metadata
            .get("project_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        tx.execute(
            "INSERT OR REPLACE INTO vector_records
             (id, memory_id, is_memory_entry, project_id, tier, timestamp, document, embedding, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.memory_id,
                record.is_memory_entry as i64,
                project_id,
                tier,
                timestamp,
                record.document,
                vector_to_bytes(&record.embedding),
                serde_json::to_string(&Value::Object(record.metadata.clone()))?,
            ],
        )?;
        Ok(())
    }

    /// Delete records by id. Idempotent; returns the number removed.
    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0usize;
        self.db.with_tx(|tx| {
            for id in ids {
                removed += tx.execute("DELETE FROM vector_records WHERE id = ?1", params![id])?;
            }
            Ok(())
        })?;
        #[cfg(feature = "vector-search")]
        {
            let mut ann = self.ann_lock()?;
            for id in ids {
                ann.remove(id);
            }
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, memory_id, is_memory_entry, document, embedding, metadata
                 FROM vector_records WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map(params![id], row_to_record)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// Load the full memory for a base id, or `None`.
    pub fn get_memory(&self, memory_id: &str) -> Result<Option<Memory>> {
        match self.get(&metadata_entry_id(memory_id))? {
            Some(record) => Ok(Some(record.to_memory()?)),
            None => Ok(None),
        }
    }

    /// All chunk record ids of a memory, ordered by chunk index.
    pub fn chunk_ids_for_memory(&self, memory_id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM vector_records
                 WHERE memory_id = ?1 AND is_memory_entry = 0
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![memory_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sort_chunk_ids(ids))
        })
    }

    /// Chunk records of a memory in chunk order.
    pub fn chunks_for_memory(&self, memory_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = Vec::new();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, memory_id, document, embedding, metadata FROM vector_records
                 WHERE memory_id = ?1 AND is_memory_entry = 0",
            )?;
            let rows = stmt.query_map(params![memory_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            for row in rows {
                let (id, memory_id, document, embedding, metadata) = row?;
                let index = serde_json::from_str::<Value>(&metadata)
                    .ok()
                    .and_then(|m| m.get("chunk_index").and_then(Value::as_u64))
                    .unwrap_or(0) as usize;
                chunks.push(Chunk {
                    id,
                    memory_id,
                    chunk_index: index,
                    content: document,
                    embedding: vector_from_bytes(&embedding).unwrap_or_default(),
                });
            }
            Ok(())
        })?;
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    /// Nearest records by cosine similarity.
    ///
    /// `entry_filter`: `Some(false)` excludes metadata entries (summary
    /// search off); `None` admits both kinds. `member_ids` restricts to a
    /// project pool's base memory ids.
    pub fn query(
        &self,
        embedding: &[f32],
        count: usize,
        entry_filter: Option<bool>,
        filter: &MetadataFilter,
        member_ids: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorHit>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        // Fast path: HNSW for unfiltered queries.
        #[cfg(feature = "vector-search")]
        if entry_filter.is_none() && filter.is_empty() && member_ids.is_none() {
            let keys = { self.ann_lock()?.search(embedding, count) };
            let mut hits = Vec::with_capacity(keys.len());
            for (key, similarity) in keys {
                if let Some(record) = self.get(&key)? {
                    hits.push(VectorHit { record, similarity });
                }
            }
            return Ok(hits);
        }

        self.scan_query(embedding, count, entry_filter, filter, member_ids)
    }

    /// Exact cosine scan. Filters are applied before scoring.
    fn scan_query(
        &self,
        embedding: &[f32],
        count: usize,
        entry_filter: Option<bool>,
        filter: &MetadataFilter,
        member_ids: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorHit>> {
        let mut hits: Vec<VectorHit> = Vec::new();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, memory_id, is_memory_entry, document, embedding, metadata
                 FROM vector_records",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            for row in rows {
                let record = row?;
                if let Some(wanted) = entry_filter {
                    if record.is_memory_entry != wanted {
                        continue;
                    }
                }
                if let Some(members) = member_ids {
                    if !members.contains(record.memory_id.as_str()) {
                        continue;
                    }
                }
                if !filter.is_empty() && !filter.matches(&record.metadata) {
                    continue;
                }
                let similarity = cosine_similarity(embedding, &record.embedding);
                hits.push(VectorHit { record, similarity });
            }
            Ok(())
        })?;

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(count);
        Ok(hits)
    }

    /// Metadata entries for a project, newest first, with embeddings.
    /// Returns base memory ids.
    pub fn project_members(
        &self,
        project_id: &str,
        cap: usize,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id, embedding FROM vector_records
                 WHERE is_memory_entry = 1 AND project_id = ?1
                 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![project_id, cap as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut members = Vec::new();
            for row in rows {
                let (memory_id, bytes) = row?;
                members.push((memory_id, vector_from_bytes(&bytes).unwrap_or_default()));
            }
            Ok(members)
        })
    }

    /// Metadata entries, newest first, optional metadata filter.
    pub fn list_recent(&self, limit: usize, filter: &MetadataFilter) -> Result<Vec<Memory>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, memory_id, is_memory_entry, document, embedding, metadata
                 FROM vector_records WHERE is_memory_entry = 1
                 ORDER BY timestamp DESC",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            let mut memories = Vec::new();
            for row in rows {
                let record = row?;
                if !filter.is_empty() && !filter.matches(&record.metadata) {
                    continue;
                }
                memories.push(record.to_memory()?);
                if memories.len() >= limit {
                    break;
                }
            }
            Ok(memories)
        })
    }

    /// Metadata entries of one tier, with summary embeddings.
    pub fn memories_in_tier(&self, tier: &str) -> Result<Vec<(Memory, Vec<f32>)>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, memory_id, is_memory_entry, document, embedding, metadata
                 FROM vector_records WHERE is_memory_entry = 1 AND tier = ?1",
            )?;
            let rows = stmt.query_map(params![tier], row_to_record)?;
            let mut out = Vec::new();
            for row in rows {
                let record = row?;
                let embedding = record.embedding.clone();
                out.push((record.to_memory()?, embedding));
            }
            Ok(out)
        })
    }

    /// All metadata entries (full memories). Consolidation's forget pass
    /// scans these.
    pub fn all_memories(&self) -> Result<Vec<Memory>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, memory_id, is_memory_entry, document, embedding, metadata
                 FROM vector_records WHERE is_memory_entry = 1",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?.to_memory()?);
            }
            Ok(out)
        })
    }

    /// Base ids of memories that have a metadata entry.
    pub fn memory_ids(&self) -> Result<HashSet<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT memory_id FROM vector_records WHERE is_memory_entry = 1")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<HashSet<_>>>()?;
            Ok(ids)
        })
    }

    /// Metadata entries whose memory has zero chunk records in V.
    pub fn memories_without_chunks(&self) -> Result<Vec<Memory>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.memory_id, m.is_memory_entry, m.document, m.embedding, m.metadata
                 FROM vector_records m
                 WHERE m.is_memory_entry = 1
                 AND NOT EXISTS (
                     SELECT 1 FROM vector_records c
                     WHERE c.memory_id = m.memory_id AND c.is_memory_entry = 0
                 )",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?.to_memory()?);
            }
            Ok(out)
        })
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Read-modify-write a memory's metadata entry. Returns false when the
    /// memory does not exist. The embedding and document are untouched.
    pub fn mutate_memory(
        &self,
        memory_id: &str,
        mutate: impl FnOnce(&mut Memory),
    ) -> Result<bool> {
        let Some(record) = self.get(&metadata_entry_id(memory_id))? else {
            return Ok(false);
        };
        let mut memory = record.to_memory()?;
        mutate(&mut memory);
        let mut metadata = match serde_json::to_value(&memory)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        metadata.insert("is_memory_entry".to_string(), Value::Bool(true));

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE vector_records
                 SET tier = ?2, timestamp = ?3, project_id = ?4, metadata = ?5, document = ?6
                 WHERE id = ?1",
                params![
                    metadata_entry_id(memory_id),
                    memory.tier.as_str(),
                    memory.timestamp.to_rfc3339(),
                    memory.project_id,
                    serde_json::to_string(&Value::Object(metadata.clone()))?,
                    memory.summary.to_string(),
                ],
            )?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Merge a patch into the metadata entry's open metadata bag. Chunk
    /// metadata is not mirrored.
    pub fn patch_memory_metadata(
        &self,
        memory_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<bool> {
        self.mutate_memory(memory_id, |memory| {
            for (key, value) in patch {
                memory.metadata.insert(key.clone(), value.clone());
            }
        })
    }

    /// Bump access bookkeeping for read memories: access count, last
    /// accessed, and a small strength boost.
    pub fn record_access(&self, memory_ids: &[String], now: DateTime<Utc>) -> Result<()> {
        for id in memory_ids {
            self.mutate_memory(id, |memory| {
                memory.access_count += 1;
                memory.last_accessed = now;
                memory.strength = (memory.strength + 0.05).min(1.0);
            })?;
        }
        Ok(())
    }

    #[cfg(feature = "vector-search")]
    fn ann_lock(&self) -> Result<std::sync::MutexGuard<'_, ann::AnnIndex>> {
        self.ann
            .lock()
            .map_err(|_| CoreError::Init("HNSW index lock poisoned".to_string()))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VectorRecord> {
    let metadata_raw: String = row.get("metadata")?;
    let metadata = serde_json::from_str::<Value>(&metadata_raw)
        .ok()
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();
    let embedding_bytes: Vec<u8> = row.get("embedding")?;
    Ok(VectorRecord {
        id: row.get("id")?,
        memory_id: row.get("memory_id")?,
        is_memory_entry: row.get::<_, i64>("is_memory_entry")? != 0,
        document: row.get("document")?,
        embedding: vector_from_bytes(&embedding_bytes).unwrap_or_default(),
        metadata,
    })
}

/// Chunk ids sort textually (`m#10` < `m#2`); order them numerically.
fn sort_chunk_ids(mut ids: Vec<String>) -> Vec<String> {
    ids.sort_by_key(|id| {
        id.rsplit('#')
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(usize::MAX)
    });
    ids
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{chunk_id, Schema, StructuredSummary, Tier};

    fn store() -> VectorStore {
        VectorStore::new(Arc::new(Database::open_in_memory().unwrap()), 8).unwrap()
    }

    fn memory(id: &str, project: Option<&str>) -> Memory {
        Memory {
            id: id.to_string(),
            schema: Schema::Incident,
            tier: Tier::Working,
            content: format!("content of {}", id),
            summary: StructuredSummary {
                topic: format!("topic {}", id),
                doc_type: "incident".into(),
                project: project.unwrap_or("Unknown").into(),
                key_actions: vec!["Fix it".into()],
            },
            refs: vec!["https://example/pr/1".into()],
            timestamp: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            importance: 0.5,
            strength: 0.5,
            project_id: project.map(str::to_string),
            language: "en".into(),
            metadata: Map::new(),
            compressed_into: None,
        }
    }

    fn unit(direction: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; 8];
        v[direction % 8] = 1.0;
        v
    }

    fn index_memory(store: &VectorStore, mem: &Memory, direction: usize) {
        let mut records = vec![VectorRecord::for_memory(mem, unit(direction)).unwrap()];
        let mut chunk = Chunk::new(&mem.id, 0, mem.content.clone());
        chunk.embedding = unit(direction);
        records.push(VectorRecord::for_chunk(mem, &chunk));
        store.upsert_batch(&records).unwrap();
    }

    #[test]
    fn memory_round_trip() {
        let store = store();
        let mem = memory("m1", Some("infra"));
        index_memory(&store, &mem, 0);

        let loaded = store.get_memory("m1").unwrap().unwrap();
        assert_eq!(loaded.id, "m1");
        assert_eq!(loaded.schema, Schema::Incident);
        assert_eq!(loaded.refs, mem.refs);
        assert_eq!(loaded.project_id.as_deref(), Some("infra"));
    }

    #[test]
    fn query_ranks_by_similarity() {
        let store = store();
        index_memory(&store, &memory("aaa", None), 0);
        index_memory(&store, &memory("bbb", None), 1);

        let hits = store
            .query(&unit(0), 10, None, &MetadataFilter::none(), None)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].record.memory_id, "aaa");
        assert!(hits[0].similarity > hits.last().unwrap().similarity);
    }

    #[test]
    fn entry_filter_excludes_summaries() {
        let store = store();
        index_memory(&store, &memory("m1", None), 0);
        let hits = store
            .query(&unit(0), 10, Some(false), &MetadataFilter::none(), None)
            .unwrap();
        assert!(hits.iter().all(|h| !h.record.is_memory_entry));
    }

    #[test]
    fn member_restriction() {
        let store = store();
        index_memory(&store, &memory("inpool", None), 0);
        index_memory(&store, &memory("outside", None), 0);
        let members: HashSet<String> = ["inpool".to_string()].into_iter().collect();
        let hits = store
            .query(&unit(0), 10, None, &MetadataFilter::none(), Some(&members))
            .unwrap();
        assert!(hits.iter().all(|h| h.record.memory_id == "inpool"));
        assert!(!hits.is_empty());
    }

    #[test]
    fn metadata_filter_conjunction() {
        let filter = MetadataFilter::from_value(Some(&serde_json::json!({
            "$and": [{"schema": "incident"}, {"tier": "working"}]
        })))
        .unwrap();
        let mut metadata = Map::new();
        metadata.insert("schema".into(), Value::String("incident".into()));
        metadata.insert("tier".into(), Value::String("working".into()));
        assert!(filter.matches(&metadata));
        metadata.insert("tier".into(), Value::String("long_term".into()));
        assert!(!filter.matches(&metadata));
    }

    #[test]
    fn bad_filter_shape_rejected() {
        assert!(MetadataFilter::from_value(Some(&serde_json::json!("nope"))).is_err());
        assert!(MetadataFilter::from_value(Some(&serde_json::json!({"$and": 3}))).is_err());
    }

    #[test]
    fn delete_is_idempotent() {
        let store = store();
        index_memory(&store, &memory("m1", None), 0);
        let ids = vec![metadata_entry_id("m1"), chunk_id("m1", 0)];
        assert_eq!(store.delete(&ids).unwrap(), 2);
        assert_eq!(store.delete(&ids).unwrap(), 0);
        assert!(store.get_memory("m1").unwrap().is_none());
    }

    #[test]
    fn mutate_memory_updates_fields() {
        let store = store();
        index_memory(&store, &memory("m1", None), 0);
        let changed = store
            .mutate_memory("m1", |m| {
                m.tier = Tier::ShortTerm;
                m.importance = 0.9;
            })
            .unwrap();
        assert!(changed);
        let loaded = store.get_memory("m1").unwrap().unwrap();
        assert_eq!(loaded.tier, Tier::ShortTerm);
        assert!((loaded.importance - 0.9).abs() < 1e-9);
        // Typed tier column updated too
        let in_tier = store.memories_in_tier("short_term").unwrap();
        assert_eq!(in_tier.len(), 1);
    }

    #[test]
    fn mutate_missing_memory_is_false() {
        let store = store();
        assert!(!store.mutate_memory("ghost", |_| {}).unwrap());
    }

    #[test]
    fn record_access_bumps_counters() {
        let store = store();
        index_memory(&store, &memory("m1", None), 0);
        store.record_access(&["m1".to_string()], Utc::now()).unwrap();
        let loaded = store.get_memory("m1").unwrap().unwrap();
        assert_eq!(loaded.access_count, 1);
        assert!(loaded.strength > 0.5);
    }

    #[test]
    fn project_members_are_base_ids() {
        let store = store();
        index_memory(&store, &memory("p1", Some("alpha")), 0);
        index_memory(&store, &memory("p2", Some("alpha")), 1);
        index_memory(&store, &memory("x1", Some("beta")), 2);

        let members = store.project_members("alpha", 10).unwrap();
        assert_eq!(members.len(), 2);
        for (id, embedding) in &members {
            assert!(!id.ends_with("-metadata"));
            assert_eq!(embedding.len(), 8);
        }
    }

    #[test]
    fn chunk_ids_sort_numerically() {
        let sorted = sort_chunk_ids(vec![
            "m#10".to_string(),
            "m#2".to_string(),
            "m#0".to_string(),
        ]);
        assert_eq!(sorted, vec!["m#0", "m#2", "m#10"]);
    }

    #[test]
    fn memories_without_chunks_detected() {
        let store = store();
        let mem = memory("lonely", None);
        let record = VectorRecord::for_memory(&mem, unit(0)).unwrap();
        store.upsert_batch(&[record]).unwrap();
        index_memory(&store, &memory("full", None), 1);

        let lonely = store.memories_without_chunks().unwrap();
        assert_eq!(lonely.len(), 1);
        assert_eq!(lonely[0].id, "lonely");
    }
}
