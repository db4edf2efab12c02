//! Task router: local vs external reasoner selection with fallback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::{ExternalReasoner, LocalReasoner, SHORT_SUMMARY_TOKEN_LIMIT};
use crate::chunker::count_tokens;
use crate::memory::Schema;

/// What the caller needs reasoned about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonerTask {
    /// Schema classification - lightweight
    Classify,
    /// Summary of an input with the given token count
    Summarise { tokens: usize },
    /// Cross-encoder (query, candidate) scoring - lightweight
    CrossEncode,
    /// Consolidation reasoning and investigations - heavy
    Investigate,
}

/// Routing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    External,
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for language/size routing and external fallbacks. Shared,
/// lock-free.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    external_calls: AtomicU64,
    external_failures: AtomicU64,
    fallbacks_to_local: AtomicU64,
    total_external_latency_ms: AtomicU64,
    max_external_latency_ms: AtomicU64,
}

/// Point-in-time copy for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RouterMetricsSnapshot {
    pub external_calls: u64,
    pub external_failures: u64,
    pub fallbacks_to_local: u64,
    pub avg_external_latency_ms: u64,
    pub max_external_latency_ms: u64,
}

impl RouterMetrics {
    pub fn record_external(&self, latency_ms: u64, success: bool) {
        self.external_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.external_failures.fetch_add(1, Ordering::Relaxed);
            self.fallbacks_to_local.fetch_add(1, Ordering::Relaxed);
        }
        self.total_external_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.max_external_latency_ms
            .fetch_max(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        let calls = self.external_calls.load(Ordering::Relaxed);
        let total = self.total_external_latency_ms.load(Ordering::Relaxed);
        RouterMetricsSnapshot {
            external_calls: calls,
            external_failures: self.external_failures.load(Ordering::Relaxed),
            fallbacks_to_local: self.fallbacks_to_local.load(Ordering::Relaxed),
            avg_external_latency_ms: if calls > 0 { total / calls } else { 0 },
            max_external_latency_ms: self.max_external_latency_ms.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Selects a reasoner per task and owns the fallback policy: external
/// failures degrade to the local reasoner and are logged, never surfaced.
pub struct Router {
    local: LocalReasoner,
    external: Option<ExternalReasoner>,
    metrics: Arc<RouterMetrics>,
}

impl Router {
    pub fn new(local: LocalReasoner, external: Option<ExternalReasoner>) -> Self {
        Self {
            local,
            external,
            metrics: Arc::new(RouterMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn local(&self) -> &LocalReasoner {
        &self.local
    }

    pub fn external_enabled(&self) -> bool {
        self.external.is_some()
    }

    /// Lightweight tasks stay local; heavy tasks go external when
    /// available.
    pub fn route(&self, task: ReasonerTask) -> Route {
        let heavy = match task {
            ReasonerTask::Classify | ReasonerTask::CrossEncode => false,
            ReasonerTask::Summarise { tokens } => tokens > SHORT_SUMMARY_TOKEN_LIMIT,
            ReasonerTask::Investigate => true,
        };
        if heavy && self.external.is_some() {
            Route::External
        } else {
            Route::Local
        }
    }

    /// Classification is always local.
    pub fn classify(&self, content: &str) -> Schema {
        self.local.classify(content)
    }

    /// Produce a structured summary. Long inputs route through the external
    /// reasoner when available; any failure there falls back to the local
    /// extractive summary. `force_external` lets callers push unsupported
    /// languages outward regardless of length.
    pub async fn summarise(
        &self,
        content: &str,
        schema: Schema,
        project: Option<&str>,
        strict_retry: bool,
        force_external: bool,
    ) -> String {
        let tokens = count_tokens(content);
        let task = ReasonerTask::Summarise { tokens };
        let wants_external = force_external || self.route(task) == Route::External;

        if wants_external {
            if let Some(external) = &self.external {
                let prompt = summary_prompt(content, schema, project, strict_retry);
                let started = std::time::Instant::now();
                match external.invoke(&prompt).await {
                    Ok(text) => {
                        self.metrics
                            .record_external(started.elapsed().as_millis() as u64, true);
                        return text;
                    }
                    Err(e) => {
                        self.metrics
                            .record_external(started.elapsed().as_millis() as u64, false);
                        warn!(error = %e, "external summariser failed, falling back to local");
                    }
                }
            }
        }
        self.local.summarise(content, schema, project)
    }

    /// Score one (query, candidate) pair. Cross-encoding is a lightweight
    /// task: local always.
    pub fn cross_encode(&self, query: &str, candidate: &str) -> f32 {
        self.local.score_pair(query, candidate)
    }
}

/// Prompt sent to the external summariser. The strict variant repeats the
/// grammar after a validation failure.
fn summary_prompt(content: &str, schema: Schema, project: Option<&str>, strict: bool) -> String {
    let mut prompt = String::new();
    prompt.push_str("Summarise the conversation below. Output exactly this shape:\n");
    prompt.push_str("Topic: <short topic>\n");
    prompt.push_str(&format!("DocType: {}\n", schema.as_str()));
    prompt.push_str(&format!("Project: {}\n", project.unwrap_or("Unknown")));
    prompt.push_str("KeyActions:\n- <imperative action>\n");
    if strict {
        prompt.push_str(
            "STRICT: every KeyActions line must start with '- '. \
             No numbered lists, no paragraphs, no empty KeyActions.\n",
        );
    }
    prompt.push_str("\n---\n");
    prompt.push_str(content);
    prompt
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_only() -> Router {
        Router::new(LocalReasoner::new(), None)
    }

    fn with_external(command: &str) -> Router {
        Router::new(
            LocalReasoner::new(),
            ExternalReasoner::from_command(command, Duration::from_secs(5)),
        )
    }

    #[test]
    fn lightweight_tasks_stay_local() {
        let router = with_external("cat");
        assert_eq!(router.route(ReasonerTask::Classify), Route::Local);
        assert_eq!(router.route(ReasonerTask::CrossEncode), Route::Local);
        assert_eq!(
            router.route(ReasonerTask::Summarise { tokens: 50 }),
            Route::Local
        );
    }

    #[test]
    fn heavy_tasks_go_external_when_available() {
        let router = with_external("cat");
        assert_eq!(
            router.route(ReasonerTask::Summarise { tokens: 500 }),
            Route::External
        );
        assert_eq!(router.route(ReasonerTask::Investigate), Route::External);
    }

    #[test]
    fn heavy_tasks_stay_local_without_external() {
        let router = local_only();
        assert_eq!(router.route(ReasonerTask::Investigate), Route::Local);
        assert_eq!(
            router.route(ReasonerTask::Summarise { tokens: 500 }),
            Route::Local
        );
    }

    #[tokio::test]
    async fn external_failure_falls_back_to_local() {
        let router = with_external("false");
        let long_content = "Fix the build. ".repeat(200);
        let summary = router
            .summarise(&long_content, Schema::Process, None, false, false)
            .await;
        // Local fallback always emits valid grammar
        assert!(crate::memory::StructuredSummary::parse(&summary).is_ok());
        let snapshot = router.metrics().snapshot();
        assert_eq!(snapshot.external_failures, 1);
        assert_eq!(snapshot.fallbacks_to_local, 1);
    }

    #[tokio::test]
    async fn short_summary_never_spawns() {
        let router = with_external("definitely-not-a-real-binary-name");
        let summary = router
            .summarise("Fix the thing.", Schema::Process, None, false, false)
            .await;
        assert!(crate::memory::StructuredSummary::parse(&summary).is_ok());
        assert_eq!(router.metrics().snapshot().external_calls, 0);
    }
}
