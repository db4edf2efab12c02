//! `consolidate_memories` - run the maintenance pass synchronously.

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
    let stats = state.consolidation.run().await?;
    Ok(serde_json::to_value(stats)?)
}

// ============================================================================
// TESTS
// ============================================================================
