//! Cross-encoder reranker with a three-level cache.
//!
//! Scores (query, candidate) pairs through the router (local reasoner for
//! this task class) to improve top-of-list ordering. Lookup order, first
//! hit wins:
//!
//! - L1 exact: (query, project, candidate id)
//! - L2 keyword: (sorted top-3 keyword signature, project, candidate id)
//! - L3 semantic: per-candidate embedding records; a hit needs cosine
//!   similarity at or above the configured threshold
//!
//! Misses score through a bounded worker pool; queue overflow skips the
//! remaining candidates and keeps rule-based order (logged and flagged).
//! All cache keys are owned value types; every operation is O(1) expected.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use super::rerank::{sort_candidates, ScoredCandidate};
use crate::config::RerankerConfig;
use crate::embedding::cosine_similarity;
use crate::error::{CoreError, Result};
use crate::reasoner::Router;

/// Embedding records kept per candidate in L3.
const L3_ENTRIES_PER_CANDIDATE: usize = 4;

/// English stop words stripped by the keyword extractor.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "of", "on", "or", "our", "that", "the", "this", "to", "was", "we", "what",
    "when", "where", "why", "with",
];

// ============================================================================
// CACHE KEYS AND ENTRIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct L1Key {
    query: String,
    project: Option<String>,
    candidate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct L2Key {
    signature: String,
    project: Option<String>,
    candidate: String,
}

#[derive(Debug, Clone)]
struct TimedScore {
    score: f32,
    inserted: Instant,
}

#[derive(Debug, Clone)]
struct L3Entry {
    embedding: Vec<f32>,
    score: f32,
    inserted: Instant,
    /// Whether warm-up seeded this entry (prefetch hit attribution)
    seeded: bool,
}

// ============================================================================
// METRICS
// ============================================================================

/// Shared cache/latency counters, reported by `get_reranker_metrics`.
#[derive(Debug, Default)]
pub struct RerankerMetrics {
    pub l1_hits: AtomicU64,
    pub l1_misses: AtomicU64,
    pub l2_hits: AtomicU64,
    pub l2_misses: AtomicU64,
    pub l3_hits: AtomicU64,
    pub l3_misses: AtomicU64,
    pub pairs_scored: AtomicU64,
    pub total_latency_us: AtomicU64,
    pub max_latency_us: AtomicU64,
    pub queue_high_water: AtomicU64,
    pub back_pressure_skips: AtomicU64,
    pub prefetch_requested: AtomicU64,
    pub prefetch_hits: AtomicU64,
    pub prefetch_misses: AtomicU64,
    pub full_corpus_fallbacks: AtomicU64,
}

/// Point-in-time metrics copy.
#[derive(Debug, Clone, Serialize)]
pub struct RerankerMetricsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l3_hits: u64,
    pub l3_misses: u64,
    pub pairs_scored: u64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub queue_high_water: u64,
    pub back_pressure_skips: u64,
    pub prefetch_requested: u64,
    pub prefetch_hits: u64,
    pub prefetch_misses: u64,
    pub full_corpus_fallbacks: u64,
}

impl RerankerMetrics {
    pub fn snapshot(&self) -> RerankerMetricsSnapshot {
        let scored = self.pairs_scored.load(Ordering::Relaxed);
        let total = self.total_latency_us.load(Ordering::Relaxed);
        RerankerMetricsSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            l3_hits: self.l3_hits.load(Ordering::Relaxed),
            l3_misses: self.l3_misses.load(Ordering::Relaxed),
            pairs_scored: scored,
            avg_latency_us: if scored > 0 { total / scored } else { 0 },
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
            queue_high_water: self.queue_high_water.load(Ordering::Relaxed),
            back_pressure_skips: self.back_pressure_skips.load(Ordering::Relaxed),
            prefetch_requested: self.prefetch_requested.load(Ordering::Relaxed),
            prefetch_hits: self.prefetch_hits.load(Ordering::Relaxed),
            prefetch_misses: self.prefetch_misses.load(Ordering::Relaxed),
            full_corpus_fallbacks: self.full_corpus_fallbacks.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// RERANKER
// ============================================================================

/// The cached, bounded cross-encoder stage.
pub struct CrossEncoderReranker {
    router: Arc<Router>,
    config: RerankerConfig,
    ttl: Duration,
    l1: Mutex<LruCache<L1Key, TimedScore>>,
    l2: Mutex<LruCache<L2Key, TimedScore>>,
    l3: Mutex<LruCache<String, Vec<L3Entry>>>,
    semaphore: Arc<Semaphore>,
    metrics: Arc<RerankerMetrics>,
}

impl CrossEncoderReranker {
    pub fn new(router: Arc<Router>, config: RerankerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cross_encoder_cache_size.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: Duration::from_secs(config.cross_encoder_cache_ttl_seconds),
            semaphore: Arc::new(Semaphore::new(config.cross_encoder_max_parallel.max(1))),
            l1: Mutex::new(LruCache::new(capacity)),
            l2: Mutex::new(LruCache::new(capacity)),
            l3: Mutex::new(LruCache::new(capacity)),
            metrics: Arc::new(RerankerMetrics::default()),
            router,
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.cross_encoder_enabled
    }

    pub fn metrics(&self) -> Arc<RerankerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Rerank the top candidates in place, then restore descending order.
    /// Returns true when back-pressure degraded the pass (remaining
    /// candidates kept their rule-based order).
    pub async fn rerank(
        &self,
        query: &str,
        query_embedding: &[f32],
        project_id: Option<&str>,
        candidates: &mut [ScoredCandidate],
    ) -> Result<bool> {
        if !self.config.cross_encoder_enabled || candidates.is_empty() {
            return Ok(false);
        }
        let top_n = self.config.cross_encoder_top_k.min(candidates.len());
        let signature = keyword_signature(query);

        // Cache pass
        let mut to_score: Vec<usize> = Vec::new();
        for (index, candidate) in candidates.iter_mut().take(top_n).enumerate() {
            match self.lookup(query, &signature, query_embedding, project_id, candidate) {
                Some(score) => candidate.rerank_score = Some(score),
                None => to_score.push(index),
            }
        }

        // Bounded scoring fan-out for the misses
        let mut degraded = false;
        if !to_score.is_empty() {
            let mut join_set: JoinSet<(usize, f32, Duration)> = JoinSet::new();
            let mut spawned = 0usize;
            for &index in &to_score {
                let waiting = (to_score.len() - spawned) as u64;
                if self.semaphore.available_permits() == 0 {
                    self.metrics
                        .queue_high_water
                        .fetch_max(waiting, Ordering::Relaxed);
                    if waiting as usize > self.config.cross_encoder_queue_limit {
                        let skipped = to_score.len() - spawned;
                        self.metrics
                            .back_pressure_skips
                            .fetch_add(skipped as u64, Ordering::Relaxed);
                        warn!(
                            skipped,
                            "cross-encoder back-pressure, keeping rule-based order"
                        );
                        degraded = true;
                        break;
                    }
                }
                let permit = Arc::clone(&self.semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| CoreError::Init("cross-encoder pool closed".to_string()))?;
                let router = Arc::clone(&self.router);
                let query_owned = query.to_string();
                let document = candidates[index].record.document.clone();
                join_set.spawn_blocking(move || {
                    let _permit = permit;
                    let started = Instant::now();
                    let score = router.cross_encode(&query_owned, &document);
                    (index, score, started.elapsed())
                });
                spawned += 1;
            }

            while let Some(joined) = join_set.join_next().await {
                let (index, score, elapsed) = joined
                    .map_err(|e| CoreError::Init(format!("cross-encoder task failed: {}", e)))?;
                let micros = elapsed.as_micros() as u64;
                self.metrics.pairs_scored.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .total_latency_us
                    .fetch_add(micros, Ordering::Relaxed);
                self.metrics
                    .max_latency_us
                    .fetch_max(micros, Ordering::Relaxed);

                let candidate_id = candidates[index].record.id.clone();
                let candidate_embedding = candidates[index].record.embedding.clone();
                self.store(
                    query,
                    &signature,
                    &candidate_embedding,
                    project_id,
                    &candidate_id,
                    score,
                );
                candidates[index].rerank_score = Some(score);
            }
        }

        // Blend and restore strict descending order
        let blend = self.config.cross_encoder_blend.clamp(0.0, 1.0);
        for candidate in candidates.iter_mut() {
            if let Some(rerank) = candidate.rerank_score {
                candidate.final_score =
                    (1.0 - blend) * candidate.combined_score + blend * rerank;
            }
        }
        sort_candidates(candidates);
        Ok(degraded)
    }

    /// Warm-up path: seed L3 with a pool candidate's embedding and prior
    /// score so a semantically close future query hits without scoring.
    pub fn seed_l3(&self, candidate_id: &str, embedding: Vec<f32>, score: f32) {
        if embedding.is_empty() {
            return;
        }
        let Ok(mut l3) = self.l3.lock() else {
            return;
        };
        let entries = l3.get_or_insert_mut(candidate_id.to_string(), Vec::new);
        push_l3_entry(
            entries,
            L3Entry {
                embedding,
                score,
                inserted: Instant::now(),
                seeded: true,
            },
        );
    }

    pub fn record_prefetch_requested(&self) {
        self.metrics
            .prefetch_requested
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_miss(&self) {
        self.metrics.prefetch_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_corpus_fallback(&self) {
        self.metrics
            .full_corpus_fallbacks
            .fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Cache internals
    // ------------------------------------------------------------------

    fn lookup(
        &self,
        query: &str,
        signature: &str,
        query_embedding: &[f32],
        project_id: Option<&str>,
        candidate: &ScoredCandidate,
    ) -> Option<f32> {
        let candidate_id = candidate.record.id.as_str();

        // L1 exact
        if let Ok(mut l1) = self.l1.lock() {
            let key = L1Key {
                query: query.to_string(),
                project: project_id.map(str::to_string),
                candidate: candidate_id.to_string(),
            };
            let cached = l1.get(&key).map(|e| (e.score, e.inserted));
            if let Some((score, inserted)) = cached {
                if inserted.elapsed() < self.ttl {
                    self.metrics.l1_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(score);
                }
                l1.pop(&key);
            }
        }
        self.metrics.l1_misses.fetch_add(1, Ordering::Relaxed);

        // L2 keyword signature
        if !signature.is_empty() {
            if let Ok(mut l2) = self.l2.lock() {
                let key = L2Key {
                    signature: signature.to_string(),
                    project: project_id.map(str::to_string),
                    candidate: candidate_id.to_string(),
                };
                let cached = l2.get(&key).map(|e| (e.score, e.inserted));
                if let Some((score, inserted)) = cached {
                    if inserted.elapsed() < self.ttl {
                        self.metrics.l2_hits.fetch_add(1, Ordering::Relaxed);
                        return Some(score);
                    }
                    l2.pop(&key);
                }
            }
        }
        self.metrics.l2_misses.fetch_add(1, Ordering::Relaxed);

        // L3 semantic
        if let Ok(mut l3) = self.l3.lock() {
            if let Some(entries) = l3.get(candidate_id) {
                for entry in entries {
                    if entry.inserted.elapsed() < self.ttl
                        && cosine_similarity(query_embedding, &entry.embedding)
                            >= self.config.semantic_hit_threshold
                    {
                        self.metrics.l3_hits.fetch_add(1, Ordering::Relaxed);
                        if entry.seeded {
                            self.metrics.prefetch_hits.fetch_add(1, Ordering::Relaxed);
                        }
                        return Some(entry.score);
                    }
                }
            }
        }
        self.metrics.l3_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write-through to all three layers after a scored miss. L3 receives
    /// the candidate's own embedding (summary embedding for metadata
    /// entries, chunk embedding otherwise), the same shape the warm-up
    /// path seeds, so lookups always compare a query embedding against
    /// candidate content.
    fn store(
        &self,
        query: &str,
        signature: &str,
        candidate_embedding: &[f32],
        project_id: Option<&str>,
        candidate_id: &str,
        score: f32,
    ) {
        let now = Instant::now();
        if let Ok(mut l1) = self.l1.lock() {
            l1.put(
                L1Key {
                    query: query.to_string(),
                    project: project_id.map(str::to_string),
                    candidate: candidate_id.to_string(),
                },
                TimedScore {
                    score,
                    inserted: now,
                },
            );
        }
        if !signature.is_empty() {
            if let Ok(mut l2) = self.l2.lock() {
                l2.put(
                    L2Key {
                        signature: signature.to_string(),
                        project: project_id.map(str::to_string),
                        candidate: candidate_id.to_string(),
                    },
                    TimedScore {
                        score,
                        inserted: now,
                    },
                );
            }
        }
        if !candidate_embedding.is_empty() {
            if let Ok(mut l3) = self.l3.lock() {
                let entries = l3.get_or_insert_mut(candidate_id.to_string(), Vec::new);
                push_l3_entry(
                    entries,
                    L3Entry {
                        embedding: candidate_embedding.to_vec(),
                        score,
                        inserted: now,
                        seeded: false,
                    },
                );
            }
        }
    }
}

fn push_l3_entry(entries: &mut Vec<L3Entry>, entry: L3Entry) {
    if entries.len() >= L3_ENTRIES_PER_CANDIDATE {
        entries.remove(0);
    }
    entries.push(entry);
}

/// Deterministic keyword signature: lowercase, strip stop words, top-3 by
/// frequency (count desc, then alphabetical), sorted and joined.
pub(crate) fn keyword_signature(query: &str) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in query.to_lowercase().split_whitespace() {
        let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if word.len() < 2 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        *counts.entry(word).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut top: Vec<String> = ranked.into_iter().take(3).map(|(w, _)| w).collect();
    top.sort();
    top.join("+")
}

// ============================================================================
// TESTS
// ============================================================================
