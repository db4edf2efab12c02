//! Application state: configuration plus every service handle, wired once
//! at startup and shared behind `Arc`. No ambient singletons - each
//! service receives its dependencies through its constructor.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use orchestrator_core::{
    Chunker, Config, CrossEncoderReranker, Database, DisabledQueryAttributes, ExternalReasoner,
    HashEmbedder, HybridSearchService, Indexer, IngestionService, LanguageDetector, LexicalIndex,
    LocalReasoner, ProjectPoolManager, ProjectsRegistry, Result, Router, RouterMetrics,
    RuleReranker, SessionManager, SharedEmbedder, VectorStore,
};
use orchestrator_core::ConsolidationService;

/// Everything a request handler needs.
pub struct AppState {
    pub config: Config,
    pub ingest: IngestionService,
    pub search: Arc<HybridSearchService>,
    pub consolidation: Arc<ConsolidationService>,
    pub sessions: SessionManager,
    pub registry: ProjectsRegistry,
    pub vector: Arc<VectorStore>,
    pub router_metrics: Arc<RouterMetrics>,
}

impl AppState {
    /// Build the full service graph from configuration.
    pub fn initialise(config: Config) -> Result<Arc<Self>> {
        config.ensure_layout()?;

        let db = Arc::new(Database::open(&config.db_path())?);
        let vector = Arc::new(VectorStore::new(Arc::clone(&db), config.embedder.dimensions)?);
        let lexical = Arc::new(LexicalIndex::new(db));
        let indexer = Arc::new(Indexer::new(Arc::clone(&vector), Arc::clone(&lexical)));

        let embedder = build_embedder(&config);
        info!(model = embedder.model_name(), dimensions = embedder.dimensions(), "embedder ready");

        let external = if config.external_reasoner_enabled() {
            ExternalReasoner::from_command(
                &config.reasoner.external.command,
                Duration::from_secs(config.reasoner.external.timeout_seconds),
            )
        } else {
            None
        };
        if external.is_none() {
            info!("external reasoner disabled; heavy tasks stay local");
        }
        let router = Arc::new(Router::new(LocalReasoner::new(), external));
        let router_metrics = router.metrics();

        let pools = Arc::new(ProjectPoolManager::new(Arc::clone(&vector), &config.project));
        let search = Arc::new(HybridSearchService::new(
            Arc::clone(&embedder),
            Arc::clone(&vector),
            Arc::clone(&lexical),
            RuleReranker::new(
                config.reranker.weights.clone(),
                Arc::new(DisabledQueryAttributes),
            ),
            Arc::new(CrossEncoderReranker::new(
                Arc::clone(&router),
                config.reranker.clone(),
            )),
            pools,
            config.search.clone(),
            config.project.clone(),
        ));

        let ingest = IngestionService::new(
            Arc::clone(&router),
            embedder,
            Arc::clone(&indexer),
            Chunker::default(),
            LanguageDetector::new(config.language.clone()),
        );

        let consolidation = Arc::new(ConsolidationService::new(
            indexer,
            config.consolidation.clone(),
            config.last_consolidation_path(),
        ));

        let sessions = SessionManager::new(
            config.session_log_dir(),
            config.project.prefetch_threshold,
        );
        let registry = ProjectsRegistry::new(config.projects_path());

        Ok(Arc::new(Self {
            config,
            ingest,
            search,
            consolidation,
            sessions,
            registry,
            vector,
            router_metrics,
        }))
    }
}

/// Pick the embedder implementation. With the `embeddings` feature the
/// ONNX model loads at startup; a load failure falls back to the
/// deterministic hash embedder rather than refusing to start.
fn build_embedder(config: &Config) -> SharedEmbedder {
    #[cfg(feature = "embeddings")]
    {
        use orchestrator_core::FastembedEmbedder;
        let cache_dir = config.data_dir.join("models");
        match FastembedEmbedder::new(
            &config.embedder.model,
            config.embedder.dimensions,
            &cache_dir,
        ) {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => {
                tracing::warn!(error = %e, "embedding model unavailable, using hash embedder");
            }
        }
    }
    Arc::new(HashEmbedder::new(config.embedder.dimensions))
}

// ============================================================================
// TEST SUPPORT
// ============================================================================
