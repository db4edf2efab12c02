//! `get_reranker_metrics` - cache, latency and routing counters.

use std::sync::Arc;

use serde_json::Value;

use orchestrator_core::Result;

use crate::state::AppState;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute(state: &Arc<AppState>, _args: Option<Value>) -> Result<Value> {
    let reranker = state.search.cross_encoder().metrics().snapshot();
    let router = state.router_metrics.snapshot();
    Ok(serde_json::json!({
        "reranker": reranker,
        "router": router,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
