//! Query-attribute extraction seam.
//!
//! Policy-disabled: the shipped extractor returns `None` and the reranker's
//! absent-attribute path allocates nothing. The trait stays so a future
//! enablement plugs into `metadata_bonus` without touching the reranker.

use std::collections::HashMap;

/// Attributes extracted from a query, matched against record metadata keys.
pub type QueryAttributes = HashMap<String, String>;

/// Extracts structured attributes from free-text queries.
pub trait QueryAttributeExtractor: Send + Sync {
    fn extract(&self, query: &str) -> Option<QueryAttributes>;
}

/// The current policy: extraction disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledQueryAttributes;

impl QueryAttributeExtractor for DisabledQueryAttributes {
    fn extract(&self, _query: &str) -> Option<QueryAttributes> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_extractor_returns_none() {
        assert!(DisabledQueryAttributes.extract("any query at all").is_none());
    }
}
