//! The consolidation pass.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::cluster::{choose_representative, cluster_by_similarity};
use crate::config::ConsolidationConfig;
use crate::error::{CoreError, Result};
use crate::memory::Tier;
use crate::storage::{ConsolidationHistoryRecord, Indexer};

/// Counters reported after a pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationStats {
    pub migrated: u64,
    pub clusters_formed: u64,
    pub representatives: u64,
    pub compressed: u64,
    pub forgotten: u64,
    pub orphans_removed: u64,
    pub duration_ms: u64,
}

/// Runs the ordered maintenance steps under an exclusive lock.
pub struct ConsolidationService {
    indexer: Arc<Indexer>,
    config: ConsolidationConfig,
    last_run_path: PathBuf,
}

impl ConsolidationService {
    pub fn new(indexer: Arc<Indexer>, config: ConsolidationConfig, last_run_path: PathBuf) -> Self {
        Self {
            indexer,
            config,
            last_run_path,
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// When the last successful pass finished, if ever.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(&self.last_run_path).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Whether the startup catch-up should run (last pass older than 24h
    /// or never recorded).
    pub fn needs_catch_up(&self, now: DateTime<Utc>) -> bool {
        match self.last_run() {
            Some(last) => now - last > chrono::Duration::hours(24),
            None => true,
        }
    }

    /// Run one full pass under the indexer's maintenance gate, held
    /// exclusively for the duration: ingestion and deletion block until
    /// the pass completes, and a concurrent pass waits its turn. The
    /// `last_consolidation` sentinel moves only on success, so a failed
    /// pass retries at the next startup.
    pub async fn run(&self) -> Result<ConsolidationStats> {
        let _guard = self.indexer.maintenance_gate().write().await;
        let started = Instant::now();
        let now = Utc::now();
        let mut stats = ConsolidationStats::default();

        self.migrate_working(now, &mut stats)?;
        self.cluster_and_compress(now, &mut stats)?;
        self.forget(now, &mut stats)?;
        self.sweep_orphans(&mut stats)?;

        stats.duration_ms = started.elapsed().as_millis() as u64;
        self.persist(now, &stats)?;
        info!(
            migrated = stats.migrated,
            clusters = stats.clusters_formed,
            compressed = stats.compressed,
            forgotten = stats.forgotten,
            orphans = stats.orphans_removed,
            duration_ms = stats.duration_ms,
            "consolidation pass complete"
        );
        Ok(stats)
    }

    /// Step 1: Working -> ShortTerm once past the retention window. The
    /// clock is the creation timestamp.
    fn migrate_working(&self, now: DateTime<Utc>, stats: &mut ConsolidationStats) -> Result<()> {
        let retention = chrono::Duration::hours(self.config.working_retention_hours);
        let vector = self.indexer.vector();
        for (memory, _) in vector.memories_in_tier(Tier::Working.as_str())? {
            if now - memory.timestamp > retention {
                vector.mutate_memory(&memory.id, |m| m.tier = Tier::ShortTerm)?;
                stats.migrated += 1;
            }
        }
        Ok(())
    }

    /// Steps 2-3: cluster short-term memories on summary-embedding cosine,
    /// choose a representative, compress the peers. Compression rewrites
    /// peer content to a representative reference plus the peer's own
    /// topic as the delta, drops the peer's lexical chunks, and keeps the
    /// metadata entry so the cluster still surfaces through the
    /// representative.
    fn cluster_and_compress(
        &self,
        now: DateTime<Utc>,
        stats: &mut ConsolidationStats,
    ) -> Result<()> {
        let vector = self.indexer.vector();
        let items: Vec<_> = vector
            .memories_in_tier(Tier::ShortTerm.as_str())?
            .into_iter()
            .filter(|(m, _)| m.compressed_into.is_none())
            .collect();
        if items.len() < self.config.min_cluster_size.max(2) {
            return Ok(());
        }

        let clusters = cluster_by_similarity(
            &items,
            self.config.cluster_similarity_threshold,
            self.config.min_cluster_size,
        );
        for cluster in clusters {
            stats.clusters_formed += 1;
            let representative = choose_representative(&cluster, &items, now);
            stats.representatives += 1;
            let representative_id = items[representative].0.id.clone();

            for &member in &cluster {
                if member == representative {
                    continue;
                }
                let member_id = items[member].0.id.clone();
                let delta = items[member].0.summary.topic.clone();
                vector.mutate_memory(&member_id, |m| {
                    m.compressed_into = Some(representative_id.clone());
                    m.content = format!("[compressed into {}] {}", representative_id, delta);
                })?;
                self.indexer.lexical().delete_by_memory_id(&member_id)?;
                stats.compressed += 1;
            }
        }
        Ok(())
    }

    /// Step 4: cascade-delete the old and unimportant. High-access and
    /// recently-read memories are exempt - unless their representative is
    /// forgotten: a compressed peer holds only a reference plus a delta,
    /// so it follows its representative out regardless of its own
    /// eligibility. Chains (a peer whose representative is itself a peer)
    /// resolve to a fixpoint.
    fn forget(&self, now: DateTime<Utc>, stats: &mut ConsolidationStats) -> Result<()> {
        let age_threshold = chrono::Duration::days(self.config.age_threshold_days);
        let recent_access = chrono::Duration::days(self.config.forget_recent_access_days);
        let memories = self.indexer.vector().all_memories()?;

        let mut forgotten: std::collections::HashSet<String> = Default::default();
        for memory in &memories {
            let old = now - memory.timestamp > age_threshold;
            let unimportant = memory.importance < self.config.importance_threshold;
            let exempt = memory.access_count >= self.config.forget_access_exemption
                || now - memory.last_accessed < recent_access && memory.access_count > 0;
            if old && unimportant && !exempt {
                self.indexer.delete_by_memory_id(&memory.id)?;
                forgotten.insert(memory.id.clone());
                stats.forgotten += 1;
            }
        }

        // Forgotten representatives carry their cluster with them
        let mut changed = !forgotten.is_empty();
        while changed {
            changed = false;
            for memory in &memories {
                if forgotten.contains(&memory.id) {
                    continue;
                }
                let follows_representative = memory
                    .compressed_into
                    .as_ref()
                    .is_some_and(|rep| forgotten.contains(rep));
                if follows_representative {
                    self.indexer.delete_by_memory_id(&memory.id)?;
                    forgotten.insert(memory.id.clone());
                    stats.forgotten += 1;
                    changed = true;
                }
            }
        }
        Ok(())
    }

    /// Step 5: cross-index orphan sweep.
    fn sweep_orphans(&self, stats: &mut ConsolidationStats) -> Result<()> {
        let vector = self.indexer.vector();
        let lexical = self.indexer.lexical();
        let live = vector.memory_ids()?;

        // L chunks whose memory no longer has a metadata entry
        for (memory_id, chunk_ids) in lexical.chunk_ids_by_memory()? {
            if !live.contains(&memory_id) {
                stats.orphans_removed += lexical.delete_chunks(&chunk_ids)? as u64;
            }
        }

        // V chunks in the same situation (left by a crash between the V
        // and L writes)
        let mut orphan_chunks = Vec::new();
        for (memory_id, chunk_ids) in vector_chunks_by_memory(vector)? {
            if !live.contains(&memory_id) {
                orphan_chunks.extend(chunk_ids);
            }
        }
        if !orphan_chunks.is_empty() {
            stats.orphans_removed += vector.delete(&orphan_chunks)? as u64;
        }

        // Metadata entries with zero chunks, unless compression explains it
        for memory in vector.memories_without_chunks()? {
            if memory.compressed_into.is_none() {
                warn!(memory_id = %memory.id, "removing chunkless metadata entry");
                vector.delete(&[memory.metadata_entry_id()])?;
                lexical.delete_by_memory_id(&memory.id)?;
                stats.orphans_removed += 1;
            }
        }
        Ok(())
    }

    /// Step 6: history row + the `last_consolidation` sentinel.
    fn persist(&self, now: DateTime<Utc>, stats: &ConsolidationStats) -> Result<()> {
        self.indexer
            .vector()
            .database()
            .record_consolidation(&ConsolidationHistoryRecord {
                run_at: now,
                migrated: stats.migrated as i64,
                clusters_formed: stats.clusters_formed as i64,
                representatives: stats.representatives as i64,
                compressed: stats.compressed as i64,
                forgotten: stats.forgotten as i64,
                orphans_removed: stats.orphans_removed as i64,
                duration_ms: stats.duration_ms as i64,
            })?;
        if let Some(parent) = self.last_run_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.last_run_path, now.to_rfc3339())
            .map_err(|e| CoreError::Consolidation(format!("sentinel write failed: {}", e)))?;
        Ok(())
    }
}

/// V chunk record ids grouped by memory id.
fn vector_chunks_by_memory(
    vector: &Arc<crate::storage::VectorStore>,
) -> Result<std::collections::HashMap<String, Vec<String>>> {
    let mut map: std::collections::HashMap<String, Vec<String>> = Default::default();
    vector.database().with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT id, memory_id FROM vector_records WHERE is_memory_entry = 0")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, memory_id) = row?;
            map.entry(memory_id).or_default().push(id);
        }
        Ok(())
    })?;
    Ok(map)
}

// ============================================================================
// TESTS
// ============================================================================
