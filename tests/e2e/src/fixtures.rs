//! A full in-process service stack over a temporary data directory.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use orchestrator_core::{
    Chunker, Config, ConsolidationService, ConversationInput, CrossEncoderReranker, Database,
    DisabledQueryAttributes, ExternalReasoner, HashEmbedder, HybridSearchService, Indexer,
    IngestionService, LanguageDetector, LexicalIndex, LocalReasoner, ProjectPoolManager, Router,
    RuleReranker, SearchRequest, SourceKind, VectorStore,
};

/// Embedding dimension used across the scenario tests.
pub const DIMENSIONS: usize = 64;

/// Everything the scenarios need, wired the way the server wires it.
pub struct TestStack {
    pub config: Config,
    pub ingest: IngestionService,
    pub search: HybridSearchService,
    pub consolidation: ConsolidationService,
    pub indexer: Arc<Indexer>,
    pub vector: Arc<VectorStore>,
    pub router: Arc<Router>,
    _dir: tempfile::TempDir,
}

impl TestStack {
    pub fn new() -> Self {
        Self::build(Config::default(), None)
    }

    /// Customise the config before wiring.
    pub fn with_config(mutate: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        mutate(&mut config);
        Self::build(config, None)
    }

    /// Route heavy summaries through an external command (scenario 6
    /// injects a misbehaving summariser this way).
    pub fn with_external_summariser(command: &str) -> Self {
        Self::build(
            Config::default(),
            ExternalReasoner::from_command(command, Duration::from_secs(10)),
        )
    }

    fn build(mut config: Config, external: Option<ExternalReasoner>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        config.data_dir = dir.path().to_path_buf();
        config.embedder.dimensions = DIMENSIONS;
        config.ensure_layout().expect("layout");

        let db = Arc::new(Database::open(&config.db_path()).expect("db"));
        let vector = Arc::new(VectorStore::new(Arc::clone(&db), DIMENSIONS).expect("vector"));
        let lexical = Arc::new(LexicalIndex::new(db));
        let indexer = Arc::new(Indexer::new(Arc::clone(&vector), Arc::clone(&lexical)));
        let embedder = Arc::new(HashEmbedder::new(DIMENSIONS));
        let router = Arc::new(Router::new(LocalReasoner::new(), external));

        let ingest = IngestionService::new(
            Arc::clone(&router),
            embedder.clone(),
            Arc::clone(&indexer),
            Chunker::default(),
            LanguageDetector::new(config.language.clone()),
        );
        let pools = Arc::new(ProjectPoolManager::new(Arc::clone(&vector), &config.project));
        let search = HybridSearchService::new(
            embedder,
            Arc::clone(&vector),
            lexical,
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
        );
        let consolidation = ConsolidationService::new(
            Arc::clone(&indexer),
            config.consolidation.clone(),
            config.last_consolidation_path(),
        );

        Self {
            config,
            ingest,
            search,
            consolidation,
            indexer,
            vector,
            router,
            _dir: dir,
        }
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

/// A conversation input with sensible defaults.
pub fn conversation(user: &str, assistant: &str) -> ConversationInput {
    ConversationInput {
        user: user.to_string(),
        assistant: assistant.to_string(),
        source: SourceKind::Cli,
        refs: vec![],
        timestamp: None,
        language: None,
        project_id: None,
        metadata: Map::new(),
    }
}

/// A plain search request.
pub fn request(query: &str, top_k: usize) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        top_k: Some(top_k),
        filters: None,
        project_id: None,
        include_session_summaries: None,
    }
}
