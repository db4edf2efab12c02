//! `list_recent_memories` - timestamp-descending listing.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use orchestrator_core::{MetadataFilter, Result};

use crate::state::AppState;

const DEFAULT_LIMIT: usize = 20;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "limit": {
                "type": "integer",
                "minimum": 1,
                "default": DEFAULT_LIMIT
            },
            "filters": {
                "type": "object",
                "description": "Metadata equality bag, same shape as search_memory"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct RecentArgs {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    filters: Option<Value>,
}

pub async fn execute(state: &Arc<AppState>, args: Option<Value>) -> Result<Value> {
    let args: RecentArgs = super::parse_args(args)?;
    let filter = MetadataFilter::from_value(args.filters.as_ref())?;
    let memories = state
        .vector
        .list_recent(args.limit.unwrap_or(DEFAULT_LIMIT), &filter)?;
    Ok(serde_json::json!({ "memories": memories }))
}

// ============================================================================
// TESTS
// ============================================================================
