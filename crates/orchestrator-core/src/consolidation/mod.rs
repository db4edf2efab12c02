//! Consolidation & Lifecycle
//!
//! The scheduled maintenance pass: migrate working memory, cluster
//! similar short-term memories, compress cluster peers, forget the
//! old-and-unimportant, sweep orphans, persist statistics. Steps run in
//! that order under an exclusive lock and never interleave.

mod cluster;
mod scheduler;
mod service;

pub use cluster::{choose_representative, cluster_by_similarity};
pub use scheduler::{next_fire, ConsolidationScheduler, Schedule};
pub use service::{ConsolidationService, ConsolidationStats};
