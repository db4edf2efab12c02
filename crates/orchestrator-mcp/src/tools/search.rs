//! `search_memory` - hybrid retrieval over both indexes.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use orchestrator_core::{Result, SearchRequest};

use crate::state::AppState;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Free-text search query"
            },
            "top_k": {
                "type": "integer",
                "minimum": 0,
                "description": "Result count; defaults from config"
            },
            "filters": {
                "type": "object",
                "description": "Metadata equality bag; use an $and array for explicit conjunction"
            },
            "project_id": {
                "type": "string",
                "description": "Scope retrieval to a project pool, with full-corpus fallback"
            },
            "include_session_summaries": {
                "type": "boolean",
                "default": true
            }
        },
        "required": ["query"]
    })
}

pub async fn execute(state: &Arc<AppState>, args: Option<Value>) -> Result<Value> {
    let request: SearchRequest = super::parse_args(args)?;
    let project_id = request.project_id.clone();

    let response = state.search.search(request).await?;

    if let Some(project_id) = project_id.as_deref() {
        if let Err(e) = state.registry.record_access(project_id) {
            warn!(project_id, error = %e, "projects.json update failed");
        }
    }
    Ok(serde_json::to_value(response)?)
}

// ============================================================================
// TESTS
// ============================================================================
