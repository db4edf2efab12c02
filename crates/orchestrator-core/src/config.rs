//! Configuration
//!
//! A single TOML file under the data directory (`config.toml`). Loaded once
//! at startup and treated as immutable for the process lifetime. A missing
//! file yields defaults; unknown keys are ignored so older configs keep
//! working across upgrades.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "CONTEXT_ORCHESTRATOR_DATA_DIR";

/// Environment variable that overrides detected language.
pub const LANG_OVERRIDE_ENV: &str = "CONTEXT_ORCHESTRATOR_LANG_OVERRIDE";

/// Default data directory name under the user's home.
const DEFAULT_DIR_NAME: &str = ".context-orchestrator";

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Embedding model identifier. Only consulted when the `embeddings`
    /// feature is compiled in; the hash embedder ignores it.
    pub model: String,
    /// Dense vector dimension.
    pub dimensions: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "nomic-ai/nomic-embed-text-v1.5".to_string(),
            dimensions: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalReasonerConfig {
    pub model: String,
}

impl Default for LocalReasonerConfig {
    fn default() -> Self {
        Self {
            model: "builtin-heuristic".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalReasonerConfig {
    /// Command line invoked for heavy reasoning tasks. Empty disables the
    /// external reasoner entirely.
    pub command: String,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for ExternalReasonerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_seconds: 45,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    pub local: LocalReasonerConfig,
    pub external: ExternalReasonerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub vector_candidate_count: usize,
    pub lexical_candidate_count: usize,
    pub include_session_summaries: bool,
    pub timeout_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            vector_candidate_count: 100,
            lexical_candidate_count: 30,
            include_session_summaries: true,
            timeout_seconds: 30,
        }
    }
}

/// Weights for the rule-based reranker blend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankWeights {
    pub strength: f32,
    pub recency: f32,
    pub refs: f32,
    pub lexical: f32,
    pub vector: f32,
    pub metadata: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            strength: 0.15,
            recency: 0.15,
            refs: 0.05,
            lexical: 0.25,
            vector: 0.35,
            metadata: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub cross_encoder_enabled: bool,
    pub cross_encoder_top_k: usize,
    pub cross_encoder_cache_size: usize,
    pub cross_encoder_cache_ttl_seconds: u64,
    pub cross_encoder_max_parallel: usize,
    /// Wait-queue length beyond which remaining candidates skip the
    /// cross-encoder and keep their rule-based order.
    pub cross_encoder_queue_limit: usize,
    /// Cosine similarity required for an L3 semantic cache hit.
    pub semantic_hit_threshold: f32,
    /// Blend weight of the cross-encoder score against the combined score.
    pub cross_encoder_blend: f32,
    pub weights: RerankWeights,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            cross_encoder_enabled: true,
            cross_encoder_top_k: 10,
            cross_encoder_cache_size: 256,
            cross_encoder_cache_ttl_seconds: 28_800,
            cross_encoder_max_parallel: 3,
            cross_encoder_queue_limit: 32,
            semantic_hit_threshold: 0.85,
            cross_encoder_blend: 0.5,
            weights: RerankWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Cron-like schedule, `minute hour * * *` subset. Default 03:00 daily.
    pub schedule: String,
    pub enabled: bool,
    pub age_threshold_days: i64,
    pub importance_threshold: f64,
    pub cluster_similarity_threshold: f32,
    pub min_cluster_size: usize,
    pub working_retention_hours: i64,
    /// Access count at or above which an old, unimportant memory is still
    /// exempt from forgetting.
    pub forget_access_exemption: i64,
    /// Memories accessed within this many days are exempt from forgetting.
    pub forget_recent_access_days: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            schedule: "0 3 * * *".to_string(),
            enabled: true,
            age_threshold_days: 30,
            importance_threshold: 0.3,
            cluster_similarity_threshold: 0.9,
            min_cluster_size: 2,
            working_retention_hours: 8,
            forget_access_exemption: 5,
            forget_recent_access_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// `project_hint` confidence at which pool warm-up fires.
    pub prefetch_threshold: f32,
    /// Maximum memories loaded into one pool.
    pub pool_size_cap: usize,
    pub pool_ttl_seconds: u64,
    /// Maximum number of pools held concurrently.
    pub pool_count_cap: usize,
    /// Queries executed through the normal search path during warm-up.
    pub prefetch_queries: Vec<String>,
    /// Pool-pass candidate cap for the degraded workflow.
    pub pool_candidate_count: usize,
    /// Minimum combined score for the result-sufficiency check.
    pub sufficiency_min_score: f32,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            prefetch_threshold: 0.7,
            pool_size_cap: 100,
            pool_ttl_seconds: 28_800,
            pool_count_cap: 16,
            prefetch_queries: vec![
                "recent decisions".to_string(),
                "open issues".to_string(),
                "how to build and test".to_string(),
            ],
            pool_candidate_count: 30,
            sufficiency_min_score: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Languages the local summariser handles natively.
    pub supported_local: Vec<String>,
    /// Where non-local languages route: "local" or "external".
    pub fallback_strategy: String,
    pub default_language: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            supported_local: vec!["en".to_string()],
            fallback_strategy: "external".to_string(),
            default_language: "en".to_string(),
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

/// Process-wide configuration. Loaded once, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub embedder: EmbedderConfig,
    pub reasoner: ReasonerConfig,
    pub search: SearchConfig,
    pub reranker: RerankerConfig,
    pub consolidation: ConsolidationConfig,
    pub project: ProjectConfig,
    pub language: LanguageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedder: EmbedderConfig::default(),
            reasoner: ReasonerConfig::default(),
            search: SearchConfig::default(),
            reranker: RerankerConfig::default(),
            consolidation: ConsolidationConfig::default(),
            project: ProjectConfig::default(),
            language: LanguageConfig::default(),
        }
    }
}

/// Default data directory: `$CONTEXT_ORCHESTRATOR_DATA_DIR`, else
/// `~/.context-orchestrator`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(base) = directories::BaseDirs::new() {
        return base.home_dir().join(DEFAULT_DIR_NAME);
    }
    PathBuf::from(DEFAULT_DIR_NAME)
}

impl Config {
    /// Load configuration for a data directory, reading `config.toml` when
    /// present. The `data_dir` argument (typically from `--data-dir`) wins
    /// over any `data_dir` key inside the file.
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self> {
        let dir = data_dir.unwrap_or_else(default_data_dir);
        let path = dir.join("config.toml");
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<Config>(&raw)
                .map_err(|e| CoreError::Init(format!("invalid config {}: {}", path.display(), e)))?
        } else {
            Config::default()
        };
        config.data_dir = dir;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from TOML text without touching the filesystem.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(raw)
            .map_err(|e| CoreError::Init(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the external reasoner is configured at all.
    pub fn external_reasoner_enabled(&self) -> bool {
        !self.reasoner.external.command.trim().is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.embedder.dimensions == 0 {
            return Err(CoreError::Init("embedder.dimensions must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.reranker.semantic_hit_threshold) {
            return Err(CoreError::Init(
                "reranker.semantic_hit_threshold must be in [0, 1]".into(),
            ));
        }
        if self.reranker.cross_encoder_max_parallel == 0 {
            return Err(CoreError::Init(
                "reranker.cross_encoder_max_parallel must be > 0".into(),
            ));
        }
        match self.language.fallback_strategy.as_str() {
            "local" | "external" => {}
            other => {
                return Err(CoreError::Init(format!(
                    "language.fallback_strategy must be 'local' or 'external', got '{}'",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Path helpers for the persisted state layout.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("orchestrator.db")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vector")
    }

    pub fn projects_path(&self) -> PathBuf {
        self.data_dir.join("projects.json")
    }

    pub fn bookmarks_path(&self) -> PathBuf {
        self.data_dir.join("bookmarks.json")
    }

    pub fn session_log_dir(&self) -> PathBuf {
        self.data_dir.join("session_log_dir")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn last_consolidation_path(&self) -> PathBuf {
        self.data_dir.join("last_consolidation")
    }

    /// Create the data directory tree. Idempotent.
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.vector_dir())?;
        std::fs::create_dir_all(self.session_log_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

/// Resolve the effective language override from the environment, if any.
pub fn env_language_override() -> Option<String> {
    std::env::var(LANG_OVERRIDE_ENV)
        .ok()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// TESTS
// ============================================================================
