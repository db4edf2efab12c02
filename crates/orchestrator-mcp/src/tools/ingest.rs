//! `ingest_conversation` - feed one conversation into the pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use orchestrator_core::{ConversationInput, CoreError, Result, SourceKind};

use crate::state::AppState;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "user": {
                "type": "string",
                "description": "User side of the conversation"
            },
            "assistant": {
                "type": "string",
                "description": "Assistant side of the conversation"
            },
            "source": {
                "type": "string",
                "enum": ["cli", "obsidian", "editor"],
                "default": "cli"
            },
            "refs": {
                "type": "array",
                "items": { "type": "string" },
                "description": "External references: URLs, file paths, commit ids"
            },
            "timestamp": {
                "type": "string",
                "description": "ISO-8601 creation time; defaults to now"
            },
            "project_id": { "type": "string" },
            "language": { "type": "string" },
            "metadata": { "type": "object" }
        },
        "required": ["user", "assistant"]
    })
}

#[derive(Debug, Deserialize)]
struct IngestArgs {
    user: String,
    assistant: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    refs: Vec<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

pub async fn execute(state: &Arc<AppState>, args: Option<Value>) -> Result<Value> {
    let args: IngestArgs = super::parse_args(args)?;

    let source = match args.source.as_deref() {
        None => SourceKind::Cli,
        Some(raw) => SourceKind::parse_name(raw).ok_or_else(|| {
            CoreError::InvalidRequest(format!("unknown source '{}'", raw))
        })?,
    };
    let timestamp = match args.timestamp.as_deref() {
        None => None,
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|e| CoreError::InvalidRequest(format!("bad timestamp: {}", e)))?
                .with_timezone(&Utc),
        ),
    };

    let input = ConversationInput {
        user: args.user,
        assistant: args.assistant,
        source,
        refs: args.refs,
        timestamp,
        language: args.language,
        project_id: args.project_id.clone(),
        metadata: args.metadata,
    };
    let memory_id = state.ingest.ingest(input).await?;

    // Registry bookkeeping is best-effort
    if let Some(project_id) = args.project_id.as_deref() {
        if let Err(e) = state.registry.record_ingest(project_id) {
            warn!(project_id, error = %e, "projects.json update failed");
        }
    }

    Ok(serde_json::json!({ "memory_id": memory_id }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;

    #[tokio::test]
    async fn ingest_returns_memory_id() {
        let (state, _dir) = test_state();
        let result = execute(
            &state,
            Some(serde_json::json!({
                "user": "why did the deploy fail",
                "assistant": "the migration timed out"
            })),
        )
        .await
        .unwrap();
        assert!(result["memory_id"].is_string());
    }

    #[tokio::test]
    async fn missing_fields_are_invalid() {
        let (state, _dir) = test_state();
        let result = execute(&state, Some(serde_json::json!({"user": "hi"}))).await;
        assert!(matches!(result, Err(CoreError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn unknown_source_rejected() {
        let (state, _dir) = test_state();
        let result = execute(
            &state,
            Some(serde_json::json!({
                "user": "u", "assistant": "a", "source": "slack"
            })),
        )
        .await;
        assert!(matches!(result, Err(CoreError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn project_ingest_updates_registry() {
        let (state, _dir) = test_state();
        execute(
            &state,
            Some(serde_json::json!({
                "user": "u", "assistant": "a", "project_id": "infra"
            })),
        )
        .await
        .unwrap();
        let records = state.registry.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].memory_count, 1);
    }

    #[test]
    fn schema_requires_both_sides() {
        let schema = schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("user")));
        assert!(required.contains(&serde_json::json!("assistant")));
    }
}
