//! Project Memory Pool
//!
//! Per-project cache of member memory ids (base form, never the
//! `-metadata` suffix) and their precomputed summary embeddings, loaded
//! from the vector store with a per-load cap. Pools expire on a TTL and
//! the pool map is LRU-bounded by project count.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

use crate::config::ProjectConfig;
use crate::error::{CoreError, Result};
use crate::storage::VectorStore;

/// A loaded pool for one project.
#[derive(Debug, Clone)]
pub struct ProjectPool {
    pub project_id: String,
    /// Base memory ids
    pub member_ids: HashSet<String>,
    /// Precomputed summary embeddings per member
    pub embeddings: HashMap<String, Vec<f32>>,
    loaded_at: Instant,
}

impl ProjectPool {
    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.member_ids.len()
    }
}

/// Lazily loads and caches project pools.
pub struct ProjectPoolManager {
    vector: Arc<VectorStore>,
    pools: Mutex<LruCache<String, Arc<ProjectPool>>>,
    ttl: Duration,
    size_cap: usize,
}

impl ProjectPoolManager {
    pub fn new(vector: Arc<VectorStore>, config: &ProjectConfig) -> Self {
        let count_cap =
            NonZeroUsize::new(config.pool_count_cap.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            vector,
            pools: Mutex::new(LruCache::new(count_cap)),
            ttl: Duration::from_secs(config.pool_ttl_seconds),
            size_cap: config.pool_size_cap,
        }
    }

    /// Get the cached pool or load it from the vector store. An expired
    /// pool reloads in place.
    pub fn get_or_load(&self, project_id: &str) -> Result<Arc<ProjectPool>> {
        if let Some(pool) = self.get_fresh(project_id)? {
            return Ok(pool);
        }
        let pool = Arc::new(self.load(project_id)?);
        let mut pools = self.lock()?;
        pools.put(project_id.to_string(), Arc::clone(&pool));
        Ok(pool)
    }

    /// Cached pool if present and within TTL.
    pub fn get_fresh(&self, project_id: &str) -> Result<Option<Arc<ProjectPool>>> {
        let mut pools = self.lock()?;
        if let Some(pool) = pools.get(project_id) {
            if pool.loaded_at.elapsed() < self.ttl {
                return Ok(Some(Arc::clone(pool)));
            }
            pools.pop(project_id);
        }
        Ok(None)
    }

    /// Drop a cached pool (tests and explicit invalidation).
    pub fn invalidate(&self, project_id: &str) -> Result<()> {
        self.lock()?.pop(project_id);
        Ok(())
    }

    fn load(&self, project_id: &str) -> Result<ProjectPool> {
        let members = self.vector.project_members(project_id, self.size_cap)?;
        debug!(project_id, count = members.len(), "loaded project pool");
        let mut member_ids = HashSet::with_capacity(members.len());
        let mut embeddings = HashMap::with_capacity(members.len());
        for (memory_id, embedding) in members {
            member_ids.insert(memory_id.clone());
            if !embedding.is_empty() {
                embeddings.insert(memory_id, embedding);
            }
        }
        Ok(ProjectPool {
            project_id: project_id.to_string(),
            member_ids,
            embeddings,
            loaded_at: Instant::now(),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Arc<ProjectPool>>>> {
        self.pools
            .lock()
            .map_err(|_| CoreError::Init("project pool lock poisoned".to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
