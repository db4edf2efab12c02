//! `get_memory` - fetch one memory with its chunks.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use orchestrator_core::{CoreError, Result};

use crate::state::AppState;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "memory_id": {
                "type": "string",
                "description": "Base memory id as returned by ingest_conversation"
            }
        },
        "required": ["memory_id"]
    })
}

#[derive(Debug, Deserialize)]
struct GetMemoryArgs {
    memory_id: String,
}

pub async fn execute(state: &Arc<AppState>, args: Option<Value>) -> Result<Value> {
    let args: GetMemoryArgs = super::parse_args(args)?;

    let memory = state
        .vector
        .get_memory(&args.memory_id)?
        .ok_or_else(|| CoreError::NotFound(args.memory_id.clone()))?;
    let chunks = state.vector.chunks_for_memory(&args.memory_id)?;

    Ok(serde_json::json!({
        "memory": memory,
        "chunks": chunks,
    }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use crate::tools::ingest;

    #[tokio::test]
    async fn round_trips_memory_and_chunks() {
        let (state, _dir) = test_state();
        let ingested = ingest::execute(
            &state,
            Some(serde_json::json!({
                "user": "how to rotate the signing key",
                "assistant": "run the rotation script and update the vault entry"
            })),
        )
        .await
        .unwrap();
        let memory_id = ingested["memory_id"].as_str().unwrap();

        let result = execute(&state, Some(serde_json::json!({"memory_id": memory_id})))
            .await
            .unwrap();
        assert_eq!(result["memory"]["id"], memory_id);
        let chunks = result["chunks"].as_array().unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0]["chunk_index"], 0);
        // Chunk ordering matches chunk_index
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk["chunk_index"], i as u64);
        }
    }

    #[tokio::test]
    async fn unknown_memory_is_not_found() {
        let (state, _dir) = test_state();
        let result = execute(&state, Some(serde_json::json!({"memory_id": "ghost"}))).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }
}
