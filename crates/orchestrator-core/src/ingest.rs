//! Ingestion Pipeline
//!
//! classify -> detect language -> summarise (validated, one stricter retry,
//! deterministic fallback) -> chunk -> embed (one batched pass) -> atomic
//! dual-index write. Returns the generated memory id.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::embedding::SharedEmbedder;
use crate::error::{CoreError, IngestCause, Result};
use crate::language::LanguageDetector;
use crate::memory::{Chunk, ConversationInput, Memory, StructuredSummary, Tier};
use crate::reasoner::Router;
use crate::storage::Indexer;

/// Validation retries before the deterministic summary fallback.
pub const SUMMARY_RETRY_MAX: usize = 1;

/// Orchestrates one conversation into a dual-indexed memory.
pub struct IngestionService {
    router: Arc<Router>,
    embedder: SharedEmbedder,
    indexer: Arc<Indexer>,
    chunker: Chunker,
    language: LanguageDetector,
}

impl IngestionService {
    pub fn new(
        router: Arc<Router>,
        embedder: SharedEmbedder,
        indexer: Arc<Indexer>,
        chunker: Chunker,
        language: LanguageDetector,
    ) -> Self {
        Self {
            router,
            embedder,
            indexer,
            chunker,
            language,
        }
    }

    /// Ingest a conversation; returns the new memory id.
    pub async fn ingest(&self, input: ConversationInput) -> Result<String> {
        if input.user.trim().is_empty() && input.assistant.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "conversation must contain user or assistant text".to_string(),
            ));
        }

        // 1. Normalise into one content string + refs list
        let content = normalise_content(&input);
        let refs = collect_refs(&input.refs, &content);

        // 2. Classify (the local classifier is total; a panic-free Process
        //    fallback is structural rather than a runtime path)
        let schema = self.router.classify(&content);

        // 3. Language, with the override chain
        let (language, _source) = self
            .language
            .resolve(input.language.as_deref(), &content);
        let force_external =
            !self.language.supported_locally(&language) && self.language.fallback_external();

        // 4. Summarise with validation, stricter retry, then fallback
        let project = input.project_id.as_deref();
        let mut summary: Option<StructuredSummary> = None;
        for attempt in 0..=SUMMARY_RETRY_MAX {
            let text = self
                .router
                .summarise(&content, schema, project, attempt > 0, force_external)
                .await;
            match StructuredSummary::parse(&text) {
                Ok(parsed) => {
                    summary = Some(parsed);
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "summary failed validation");
                }
            }
        }
        let summary = summary.unwrap_or_else(|| {
            debug!("falling back to deterministic summary");
            StructuredSummary::fallback(&content, schema.as_str(), project)
        });

        // 5. Chunk
        let memory_id = Uuid::new_v4().to_string();
        let chunk_texts = self.chunker.split(&content);
        let mut chunks: Vec<Chunk> = chunk_texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk::new(&memory_id, i, text))
            .collect();

        // 6. One batched embedding pass over chunks + summary
        let summary_text = summary.embedding_text();
        let mut texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        texts.push(summary_text.as_str());
        let mut embeddings = self.embedder.embed_batch(&texts).map_err(|e| {
            CoreError::IngestFailed {
                cause: IngestCause::Embedding,
                message: e.to_string(),
            }
        })?;
        let summary_embedding = embeddings.pop().ok_or_else(|| CoreError::IngestFailed {
            cause: IngestCause::Embedding,
            message: "embedder returned no output".to_string(),
        })?;
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }

        // 7. Build the memory and write both indexes atomically
        let timestamp = input.timestamp.unwrap_or_else(Utc::now);
        let strength = (0.5 + 0.1 * refs.len().min(3) as f64).min(1.0);
        let memory = Memory {
            id: memory_id.clone(),
            schema,
            tier: Tier::Working,
            content,
            summary,
            refs,
            timestamp,
            last_accessed: timestamp,
            access_count: 0,
            importance: 0.5,
            strength,
            project_id: input.project_id.clone(),
            language,
            metadata: input.metadata.clone(),
            compressed_into: None,
        };
        // Blocks while a consolidation pass holds the gate exclusively
        let _gate = self.indexer.maintenance_gate().read().await;
        self.indexer.index(&memory, &chunks, summary_embedding)?;

        debug!(memory_id = %memory.id, schema = %memory.schema, chunks = chunks.len(), "ingested");
        Ok(memory_id)
    }
}

/// Collapse a conversation into one content string.
fn normalise_content(input: &ConversationInput) -> String {
    match (input.user.trim(), input.assistant.trim()) {
        (user, "") => format!("User: {}", user),
        ("", assistant) => format!("Assistant: {}", assistant),
        (user, assistant) => format!("User: {}\n\nAssistant: {}", user, assistant),
    }
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).unwrap())
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)((?:/[\w.\-]+){2,})").unwrap())
}

fn commit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9a-f]{7,40}\b").unwrap())
}

/// Explicit refs first, then URLs, absolute paths and commit ids extracted
/// from the text. First-seen order, deduplicated.
fn collect_refs(explicit: &[String], content: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !refs.iter().any(|r| r == candidate) {
            refs.push(candidate.to_string());
        }
    };

    for r in explicit {
        push(r);
    }
    for m in url_regex().find_iter(content) {
        push(m.as_str());
    }
    for caps in path_regex().captures_iter(content) {
        if let Some(m) = caps.get(1) {
            push(m.as_str());
        }
    }
    for m in commit_regex().find_iter(content) {
        // Avoid swallowing plain numbers: require at least one hex letter
        if m.as_str().bytes().any(|b| b.is_ascii_alphabetic()) {
            push(m.as_str());
        }
    }
    refs
}

// ============================================================================
// TESTS
// ============================================================================
