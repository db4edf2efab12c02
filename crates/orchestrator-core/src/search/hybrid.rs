//! Hybrid search orchestration.
//!
//! One request: embed the query once, fan out vector and lexical candidate
//! searches concurrently, merge by record id, dedup to one representative
//! per memory, rule-rerank, optionally cross-encoder rerank, and return a
//! strictly ordered page. With an active `project_id` the pool-first
//! degraded workflow runs ahead of the full corpus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::cross_encoder::CrossEncoderReranker;
use super::rerank::{sort_candidates, RuleReranker, ScoredCandidate};
use super::{SearchRequest, SearchResponse, SearchResultItem};
use crate::config::{ProjectConfig, SearchConfig};
use crate::embedding::SharedEmbedder;
use crate::error::{CoreError, Result, SearchCause};
use crate::memory::metadata_entry_id;
use crate::pool::ProjectPoolManager;
use crate::storage::{LexicalIndex, MetadataFilter, VectorStore};

/// The hybrid retrieval engine.
pub struct HybridSearchService {
    embedder: SharedEmbedder,
    vector: Arc<VectorStore>,
    lexical: Arc<LexicalIndex>,
    rule: RuleReranker,
    cross: Arc<CrossEncoderReranker>,
    pools: Arc<ProjectPoolManager>,
    search_config: SearchConfig,
    project_config: ProjectConfig,
}

impl HybridSearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: SharedEmbedder,
        vector: Arc<VectorStore>,
        lexical: Arc<LexicalIndex>,
        rule: RuleReranker,
        cross: Arc<CrossEncoderReranker>,
        pools: Arc<ProjectPoolManager>,
        search_config: SearchConfig,
        project_config: ProjectConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            lexical,
            rule,
            cross,
            pools,
            search_config,
            project_config,
        }
    }

    pub fn cross_encoder(&self) -> &Arc<CrossEncoderReranker> {
        &self.cross
    }

    pub fn pools(&self) -> &Arc<ProjectPoolManager> {
        &self.pools
    }

    /// Run one search request under the configured deadline.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        if request.query.trim().is_empty() {
            return Err(CoreError::InvalidRequest("query must not be empty".into()));
        }
        let top_k = request.top_k.unwrap_or(self.search_config.top_k);
        if top_k == 0 {
            // No storage access at all
            return Ok(SearchResponse {
                results: Vec::new(),
                warning: None,
                full_corpus_fallback: false,
            });
        }

        let deadline = Duration::from_secs(self.search_config.timeout_seconds.max(1));
        match tokio::time::timeout(deadline, self.search_inner(request, top_k)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout),
        }
    }

    async fn search_inner(&self, request: SearchRequest, top_k: usize) -> Result<SearchResponse> {
        let filter = MetadataFilter::from_value(request.filters.as_ref())?;
        let include_summaries = request
            .include_session_summaries
            .unwrap_or(self.search_config.include_session_summaries);
        let entry_filter = if include_summaries { None } else { Some(false) };

        // Embedded once per request; both passes reuse it
        let query_embedding = self.embedder.embed(&request.query).map_err(|e| {
            CoreError::SearchFailed {
                cause: SearchCause::Embedding,
                message: e.to_string(),
            }
        })?;

        let mut warning = None;
        let mut full_corpus_fallback = false;
        let mut candidates: Vec<ScoredCandidate>;

        if let Some(project_id) = request.project_id.as_deref() {
            // Degraded workflow: pool pass first, full corpus only when
            // the pool pass is insufficient.
            let pool = self.pools.get_or_load(project_id)?;
            let mut pool_candidates = if pool.is_empty() {
                Vec::new()
            } else {
                let mut pass = self
                    .candidate_pass(
                        &request.query,
                        &query_embedding,
                        entry_filter,
                        &filter,
                        Some(&pool.member_ids),
                        self.project_config.pool_candidate_count,
                        self.project_config.pool_candidate_count,
                    )
                    .await?;
                self.rule.rerank(&request.query, &mut pass, Utc::now());
                warning = self
                    .cross_rerank(&request.query, &query_embedding, Some(project_id), &mut pass)
                    .await;
                pass
            };

            let sufficient = pool_candidates
                .iter()
                .filter(|c| c.final_score >= self.project_config.sufficiency_min_score)
                .count()
                >= top_k;

            if sufficient {
                candidates = pool_candidates;
            } else {
                // Second pass over the full corpus, merged with the pool
                // pass; observable only because the first was insufficient
                debug!(project_id, "pool pass insufficient, full-corpus fallback");
                self.cross.record_full_corpus_fallback();
                full_corpus_fallback = true;

                let mut full = self
                    .candidate_pass(
                        &request.query,
                        &query_embedding,
                        entry_filter,
                        &filter,
                        None,
                        self.search_config.vector_candidate_count,
                        self.search_config.lexical_candidate_count,
                    )
                    .await?;
                self.rule.rerank(&request.query, &mut full, Utc::now());
                let cross_warning = self
                    .cross_rerank(&request.query, &query_embedding, Some(project_id), &mut full)
                    .await;
                warning = warning.or(cross_warning);

                candidates = merge_passes(std::mem::take(&mut pool_candidates), full);
            }
        } else {
            let mut pass = self
                .candidate_pass(
                    &request.query,
                    &query_embedding,
                    entry_filter,
                    &filter,
                    None,
                    self.search_config.vector_candidate_count,
                    self.search_config.lexical_candidate_count,
                )
                .await?;
            self.rule.rerank(&request.query, &mut pass, Utc::now());
            warning = self
                .cross_rerank(&request.query, &query_embedding, None, &mut pass)
                .await;
            candidates = pass;
        }

        candidates.truncate(top_k);

        // Non-fatal background refresh of access bookkeeping
        let accessed: Vec<String> = candidates.iter().map(|c| c.memory.id.clone()).collect();
        if !accessed.is_empty() {
            let vector = Arc::clone(&self.vector);
            tokio::spawn(async move {
                let now = Utc::now();
                match tokio::task::spawn_blocking(move || vector.record_access(&accessed, now))
                    .await
                {
                    Ok(Err(e)) => warn!(error = %e, "access update failed"),
                    Err(e) => warn!(error = %e, "access update task failed"),
                    Ok(Ok(())) => {}
                }
            });
        }

        let results = candidates.into_iter().map(result_item).collect();
        Ok(SearchResponse {
            results,
            warning,
            full_corpus_fallback,
        })
    }

    /// Steps 2-4 of the algorithm: concurrent vector + lexical candidate
    /// fetch, merge by record id, dedup to one representative per memory.
    #[allow(clippy::too_many_arguments)]
    async fn candidate_pass(
        &self,
        query: &str,
        query_embedding: &[f32],
        entry_filter: Option<bool>,
        filter: &MetadataFilter,
        member_ids: Option<&HashSet<String>>,
        vector_count: usize,
        lexical_count: usize,
    ) -> Result<Vec<ScoredCandidate>> {
        let vector = Arc::clone(&self.vector);
        let lexical = Arc::clone(&self.lexical);
        let embedding = query_embedding.to_vec();
        let filter_owned = filter.clone();
        let members_owned = member_ids.cloned();
        let query_owned = query.to_string();

        let vector_task = tokio::task::spawn_blocking(move || {
            vector.query(
                &embedding,
                vector_count,
                entry_filter,
                &filter_owned,
                members_owned.as_ref(),
            )
        });
        let lexical_task =
            tokio::task::spawn_blocking(move || lexical.search(&query_owned, lexical_count));

        let (vector_hits, lexical_hits) = tokio::join!(vector_task, lexical_task);
        let vector_hits = vector_hits
            .map_err(|e| join_failure(SearchCause::Vector, e))?
            .map_err(|e| search_failure(SearchCause::Vector, e))?;
        let lexical_hits = lexical_task_result(lexical_hits)?;

        // Merge by record id; a missing lexical score defaults to 0 and a
        // missing vector similarity to the neutral 0.0
        let mut merged: HashMap<String, (Option<crate::storage::VectorRecord>, f32, f32)> =
            HashMap::new();
        for hit in vector_hits {
            merged.insert(hit.record.id.clone(), (Some(hit.record), hit.similarity, 0.0));
        }
        for hit in lexical_hits {
            if let Some(members) = member_ids {
                if !members.contains(hit.memory_id.as_str()) {
                    continue;
                }
            }
            match merged.get_mut(&hit.chunk_id) {
                Some(entry) => entry.2 = hit.score,
                None => {
                    merged.insert(hit.chunk_id.clone(), (None, 0.0, hit.score));
                }
            }
        }

        let max_lexical = merged
            .values()
            .map(|(_, _, lex)| *lex)
            .fold(0.0_f32, f32::max)
            .max(f32::EPSILON);

        // Hydrate lexical-only candidates from V and apply the metadata
        // filter uniformly
        let mut per_memory: HashMap<String, ScoredCandidate> = HashMap::new();
        for (record_id, (record, similarity, lexical_score)) in merged {
            let record = match record {
                Some(record) => record,
                None => match self.vector.get(&record_id)? {
                    Some(record) => record,
                    // L row with no V record: orphan, the sweep owns it
                    None => continue,
                },
            };
            if !filter.is_empty() && !filter.matches(&record.metadata) {
                continue;
            }
            let memory_id = record.memory_id.clone();
            let normalized_lexical = lexical_score / max_lexical;
            let merged_score = similarity + normalized_lexical;

            // Strict merged-score comparison with a record-id tie-break so
            // the surviving representative never depends on map order
            let better = per_memory
                .get(&memory_id)
                .map(|existing| {
                    let existing_score =
                        existing.vector_similarity + existing.normalized_lexical;
                    merged_score > existing_score
                        || (merged_score == existing_score && record.id < existing.record.id)
                })
                .unwrap_or(true);
            if !better {
                continue;
            }
            let Some(memory) = self.vector.get_memory(&memory_id)? else {
                continue;
            };
            per_memory.insert(
                memory_id,
                ScoredCandidate {
                    record,
                    memory,
                    vector_similarity: similarity,
                    lexical_score,
                    normalized_lexical,
                    combined_score: 0.0,
                    rerank_score: None,
                    final_score: 0.0,
                },
            );
        }
        Ok(per_memory.into_values().collect())
    }

    /// Cross-encoder stage; failures degrade to rule-based order with a
    /// warning instead of failing the search.
    async fn cross_rerank(
        &self,
        query: &str,
        query_embedding: &[f32],
        project_id: Option<&str>,
        candidates: &mut Vec<ScoredCandidate>,
    ) -> Option<String> {
        if !self.cross.enabled() {
            return None;
        }
        match self
            .cross
            .rerank(query, query_embedding, project_id, candidates)
            .await
        {
            Ok(false) => None,
            Ok(true) => Some("cross-encoder skipped under back-pressure".to_string()),
            Err(e) => {
                warn!(error = %e, "cross-encoder rerank failed, keeping rule-based order");
                Some(format!("cross-encoder rerank failed: {}", e))
            }
        }
    }

    /// Warm the caches for a project. Best-effort: errors are logged and
    /// swallowed; never blocks a user query.
    pub async fn warm_up_project(&self, project_id: &str) {
        self.cross.record_prefetch_requested();
        let pool = match self.pools.get_or_load(project_id) {
            Ok(pool) if !pool.is_empty() => pool,
            Ok(_) => {
                self.cross.record_prefetch_miss();
                return;
            }
            Err(e) => {
                warn!(project_id, error = %e, "pool warm-up failed");
                self.cross.record_prefetch_miss();
                return;
            }
        };

        // Prefetch queries run through the normal path to fill L1/L2
        let mut best_scores: HashMap<String, f32> = HashMap::new();
        for query in &self.project_config.prefetch_queries {
            let request = SearchRequest {
                query: query.clone(),
                top_k: None,
                filters: None,
                project_id: Some(project_id.to_string()),
                include_session_summaries: None,
            };
            match self.search(request).await {
                Ok(response) => {
                    for item in response.results {
                        let entry = best_scores.entry(item.memory_id).or_insert(0.0);
                        *entry = entry.max(item.combined_score);
                    }
                }
                Err(e) => warn!(project_id, query, error = %e, "prefetch query failed"),
            }
        }

        // Pool embeddings go into L3 keyed by the metadata-entry id, with
        // the best combined score observed during prefetch as the prior
        for (memory_id, embedding) in &pool.embeddings {
            let prior = best_scores.get(memory_id).copied().unwrap_or(0.5);
            self.cross
                .seed_l3(&metadata_entry_id(memory_id), embedding.clone(), prior);
        }
        debug!(project_id, members = pool.len(), "project warm-up complete");
    }
}

fn result_item(candidate: ScoredCandidate) -> SearchResultItem {
    SearchResultItem {
        id: candidate.record.id,
        memory_id: candidate.memory.id,
        content: candidate.record.document,
        metadata: candidate.record.metadata,
        score: candidate.final_score,
        vector_similarity: candidate.vector_similarity,
        lexical_score: candidate.lexical_score,
        combined_score: candidate.combined_score,
        rerank_score: candidate.rerank_score,
    }
}

/// Merge the pool and full-corpus passes: best final score wins per
/// memory, then strict descending order.
fn merge_passes(
    pool: Vec<ScoredCandidate>,
    full: Vec<ScoredCandidate>,
) -> Vec<ScoredCandidate> {
    let mut per_memory: HashMap<String, ScoredCandidate> = HashMap::new();
    for candidate in pool.into_iter().chain(full) {
        match per_memory.get(&candidate.memory.id) {
            Some(existing) if existing.final_score >= candidate.final_score => {}
            _ => {
                per_memory.insert(candidate.memory.id.clone(), candidate);
            }
        }
    }
    let mut merged: Vec<ScoredCandidate> = per_memory.into_values().collect();
    sort_candidates(&mut merged);
    merged
}

fn search_failure(cause: SearchCause, e: CoreError) -> CoreError {
    CoreError::SearchFailed {
        cause,
        message: e.to_string(),
    }
}

fn join_failure(cause: SearchCause, e: tokio::task::JoinError) -> CoreError {
    CoreError::SearchFailed {
        cause,
        message: e.to_string(),
    }
}

fn lexical_task_result(
    joined: std::result::Result<Result<Vec<crate::storage::LexicalHit>>, tokio::task::JoinError>,
) -> Result<Vec<crate::storage::LexicalHit>> {
    joined
        .map_err(|e| join_failure(SearchCause::Lexical, e))?
        .map_err(|e| search_failure(SearchCause::Lexical, e))
}

// ============================================================================
// TESTS
// ============================================================================
