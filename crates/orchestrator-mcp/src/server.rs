//! MCP server core: request routing and error mapping.
//!
//! The core methods are exposed twice - as direct JSON-RPC methods and as
//! MCP tools via `tools/call` - both dispatching to the same executors.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use orchestrator_core::CoreError;

use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::state::AppState;
use crate::tools;

/// MCP server over the shared application state.
pub struct McpServer {
    state: Arc<AppState>,
    initialized: bool,
}

impl McpServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            initialized: false,
        }
    }

    /// Handle one request; `None` means notification, no response.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!(method = %request.method, "rejecting request before initialization");
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(tools_list()),
            "tools/call" => self.handle_tools_call(request.params).await,

            // Direct core methods
            method => match self.dispatch(method, request.params).await {
                Some(result) => result.map_err(map_core_error),
                None => Err(JsonRpcError::method_not_found(method)),
            },
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        // Version negotiation: accept an older client version
        let client_version = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(MCP_VERSION);
        let negotiated = if client_version < MCP_VERSION {
            client_version.to_string()
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        info!(protocol = %negotiated, "MCP session initialized");

        Ok(serde_json::json!({
            "protocolVersion": negotiated,
            "serverInfo": {
                "name": "context-orchestrator",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": { "listChanged": false },
            },
            "instructions": "Context Orchestrator is the assistant's external brain. \
                Ingest finished conversations with ingest_conversation, recall past \
                experience with search_memory (pass project_id for project-scoped \
                recall), and run consolidate_memories when memories look stale.",
        }))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing tool name"))?
            .to_string();
        let arguments = params.get("arguments").cloned();

        match self.dispatch(&name, arguments).await {
            Some(Ok(value)) => Ok(serde_json::json!({
                "content": [{
                    "type": "text",
                    "text": serde_json::to_string_pretty(&value)
                        .unwrap_or_else(|_| value.to_string()),
                }],
                "isError": false,
            })),
            Some(Err(e)) => Err(map_core_error(e)),
            None => Err(JsonRpcError::method_not_found(&name)),
        }
    }

    /// Route a core method/tool name to its executor. `None` for unknown
    /// names.
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Option<Result<Value, CoreError>> {
        let state = &self.state;
        let result = match method {
            "ingest_conversation" => tools::ingest::execute(state, params).await,
            "search_memory" => tools::search::execute(state, params).await,
            "get_memory" => tools::memory::execute(state, params).await,
            "list_recent_memories" => tools::recent::execute(state, params).await,
            "consolidate_memories" => tools::consolidate::execute(state, params).await,
            "start_session" => tools::session::start(state, params).await,
            "end_session" => tools::session::end(state, params).await,
            "add_command" => tools::session::add_command(state, params).await,
            "get_reranker_metrics" => tools::metrics::execute(state, params).await,
            _ => return None,
        };
        Some(result)
    }
}

/// The MCP tool catalogue.
fn tools_list() -> Value {
    let mut catalogue: Vec<(&str, &str, Value)> = Vec::new();
    catalogue.push((
        "ingest_conversation",
        "Store a finished conversation as a durable memory: classified, summarised, chunked and dual-indexed.",
        tools::ingest::schema(),
    ));
    catalogue.push((
        "search_memory",
        "Hybrid search over past memories (vector + BM25 with reranking). Pass project_id for pool-first project recall.",
        tools::search::schema(),
    ));
    catalogue.push((
        "get_memory",
        "Fetch one memory with its chunks by id.",
        tools::memory::schema(),
    ));
    catalogue.push((
        "list_recent_memories",
        "List memories newest-first, optionally filtered by metadata.",
        tools::recent::schema(),
    ));
    catalogue.push((
        "consolidate_memories",
        "Run the consolidation pass now: migrate tiers, cluster, compress, forget, sweep orphans.",
        tools::consolidate::schema(),
    ));
    catalogue.push((
        "start_session",
        "Open a command-event session.",
        tools::session::start_schema(),
    ));
    catalogue.push((
        "end_session",
        "Close a session; its transcript stays on disk.",
        tools::session::end_schema(),
    ));
    catalogue.push((
        "add_command",
        "Record a command event; strong project hints trigger pool warm-up.",
        tools::session::add_command_schema(),
    ));
    catalogue.push((
        "get_reranker_metrics",
        "Reranker cache hit/miss, latency, prefetch and routing counters.",
        tools::metrics::schema(),
    ));

    let tools: Vec<Value> = catalogue
        .into_iter()
        .map(|(name, description, schema)| {
            serde_json::json!({
                "name": name,
                "description": description,
                "inputSchema": schema,
            })
        })
        .collect();
    serde_json::json!({ "tools": tools })
}

/// Map the core taxonomy onto JSON-RPC codes: schema violations are
/// `-32602`, everything else `-32603` with the kind attached. Stack
/// traces stay in the logs.
fn map_core_error(error: CoreError) -> JsonRpcError {
    let kind = error.kind();
    match &error {
        CoreError::InvalidRequest(message) => {
            JsonRpcError::invalid_params(message).with_kind(kind)
        }
        CoreError::NotFound(what) => {
            JsonRpcError::internal_error(&format!("not found: {}", what)).with_kind(kind)
        }
        CoreError::Timeout => JsonRpcError::internal_error("deadline exceeded").with_kind(kind),
        other => {
            warn!(error = %other, "internal failure");
            JsonRpcError::internal_error(&other.to_string()).with_kind(kind)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
