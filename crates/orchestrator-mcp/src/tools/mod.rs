//! Tool handlers.
//!
//! Each module pairs a JSON-schema describing its input with an `execute`
//! entry point. The same executors back both the direct JSON-RPC methods
//! and MCP `tools/call` dispatch.

pub mod consolidate;
pub mod ingest;
pub mod memory;
pub mod metrics;
pub mod recent;
pub mod search;
pub mod session;

use orchestrator_core::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse tool arguments into a typed shape, mapping failures to
/// `InvalidRequest` so they surface as `-32602`.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Option<Value>) -> Result<T> {
    let value = args.unwrap_or(Value::Object(serde_json::Map::new()));
    serde_json::from_value(value)
        .map_err(|e| CoreError::InvalidRequest(format!("invalid arguments: {}", e)))
}
