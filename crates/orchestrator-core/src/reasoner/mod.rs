//! Model Routing
//!
//! Two reasoners produce short text outputs (classification labels,
//! structured summaries, cross-encoder scores):
//!
//! - `LocalReasoner` - deterministic, always available, in-process.
//! - `ExternalReasoner` - opaque child-process invocation; may be disabled
//!   or fail, and is always best-effort.
//!
//! The `Router` picks between them per task with a lightweight/heavyweight
//! heuristic and guards against re-entry: external invocations carry
//! `CONTEXT_ORCHESTRATOR_INTERNAL=1` so a CLI wrapper tailing the terminal
//! does not re-record the call.

mod external;
mod local;
mod router;

pub use external::ExternalReasoner;
pub use local::LocalReasoner;
pub use router::{ReasonerTask, Route, Router, RouterMetrics, RouterMetricsSnapshot};

/// Environment flag set on child processes spawned by the router. Advisory;
/// absence of the wrapper is safe.
pub const INTERNAL_ENV_FLAG: &str = "CONTEXT_ORCHESTRATOR_INTERNAL";

/// Inputs above this token count are "long" for routing purposes.
pub const SHORT_SUMMARY_TOKEN_LIMIT: usize = 100;
