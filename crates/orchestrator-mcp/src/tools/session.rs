//! Session lifecycle: `start_session`, `end_session`, `add_command`.
//!
//! `add_command` feeds the project-hint heuristic; when a hint crosses the
//! prefetch threshold, pool warm-up is spawned in the background - it
//! never blocks the command event.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use orchestrator_core::Result;

use crate::state::AppState;

pub fn start_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub fn end_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "session_id": { "type": "string" }
        },
        "required": ["session_id"]
    })
}

pub fn add_command_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "session_id": { "type": "string" },
            "command": { "type": "string" },
            "cwd": {
                "type": "string",
                "description": "Working directory the command ran in"
            }
        },
        "required": ["session_id", "command"]
    })
}

#[derive(Debug, Deserialize)]
struct EndArgs {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct AddCommandArgs {
    session_id: String,
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

pub async fn start(state: &Arc<AppState>, _args: Option<Value>) -> Result<Value> {
    let session_id = state.sessions.start_session()?;
    Ok(serde_json::json!({ "session_id": session_id }))
}

pub async fn end(state: &Arc<AppState>, args: Option<Value>) -> Result<Value> {
    let args: EndArgs = super::parse_args(args)?;
    let session = state.sessions.end_session(&args.session_id)?;
    Ok(serde_json::json!({
        "session_id": session.session_id,
        "started_at": session.started_at,
        "events": session.events.len(),
    }))
}

pub async fn add_command(state: &Arc<AppState>, args: Option<Value>) -> Result<Value> {
    let args: AddCommandArgs = super::parse_args(args)?;
    let hint = state
        .sessions
        .add_command(&args.session_id, &args.command, args.cwd.as_deref())?;

    if let Some(hint) = &hint {
        info!(project_id = %hint.project_id, confidence = hint.confidence, "warming project pool");
        let search = Arc::clone(&state.search);
        let project_id = hint.project_id.clone();
        tokio::spawn(async move {
            search.warm_up_project(&project_id).await;
        });
    }

    Ok(serde_json::json!({
        "accepted": true,
        "project_hint": hint,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
