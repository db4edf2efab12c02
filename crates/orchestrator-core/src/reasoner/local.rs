//! Local reasoner: deterministic classification, extractive structured
//! summaries, and term-overlap relevance scoring.
//!
//! This is the always-available half of the router. It never fails, which
//! is what makes it a safe fallback target for every external-reasoner
//! error path.

use crate::memory::{Schema, StructuredSummary};

/// Keyword families for schema classification. First match family with the
/// highest hit count wins; everything else is a Process.
const INCIDENT_TERMS: &[&str] = &[
    "error", "fail", "failed", "failure", "panic", "crash", "bug", "broken", "timeout",
    "outage", "regression", "exception", "traceback", "refused", "denied",
];
const DECISION_TERMS: &[&str] = &[
    "decide", "decided", "decision", "chose", "choose", "instead of", "trade-off", "tradeoff",
    "option", "alternative", "went with", "settled on", "pros and cons",
];
const SNIPPET_TERMS: &[&str] = &[
    "snippet", "function", "struct", "class", "impl", "def ", "fn ", "const ", "#!/",
];

/// Deterministic in-process reasoner.
#[derive(Debug, Clone, Default)]
pub struct LocalReasoner;

impl LocalReasoner {
    pub fn new() -> Self {
        Self
    }

    /// Classify a conversation into a schema. Counts keyword-family hits;
    /// a fenced code block is strong evidence for Snippet.
    pub fn classify(&self, content: &str) -> Schema {
        let lower = content.to_lowercase();

        let mut incident = count_hits(&lower, INCIDENT_TERMS);
        let decision = count_hits(&lower, DECISION_TERMS);
        let mut snippet = count_hits(&lower, SNIPPET_TERMS);

        if lower.contains("```") {
            snippet += 2;
        }
        // "fixed"/"resolved" only counts as incident evidence next to a
        // failure word, otherwise every how-to reads as an incident.
        if (lower.contains("fixed") || lower.contains("resolved")) && incident > 0 {
            incident += 1;
        }

        let best = incident.max(decision).max(snippet);
        if best == 0 {
            return Schema::Process;
        }
        // Deterministic priority on ties: incidents, then decisions.
        if incident == best {
            Schema::Incident
        } else if decision == best {
            Schema::Decision
        } else {
            Schema::Snippet
        }
    }

    /// Extractive structured summary. Always emits the exact grammar, so
    /// the local path never triggers the validation retry.
    pub fn summarise(&self, content: &str, schema: Schema, project: Option<&str>) -> String {
        StructuredSummary::fallback(content, schema.as_str(), project).to_string()
    }

    /// Relevance of a candidate document to a query. BM25-like term overlap
    /// in [0, 1]-ish range; used as the local cross-encoder.
    pub fn score_pair(&self, query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
        let doc_lower = document.to_lowercase();
        let doc_len = doc_lower.len() as f32;

        if doc_len == 0.0 || query_terms.is_empty() {
            return 0.0;
        }

        let k1 = 1.2_f32;
        let b = 0.75_f32;
        let avg_doc_len = 500.0_f32;

        let mut score = 0.0;
        for term in &query_terms {
            let tf = doc_lower.matches(term).count() as f32;
            if tf > 0.0 {
                let numerator = tf * (k1 + 1.0);
                let denominator = tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len));
                score += numerator / denominator;
            }
        }
        score / query_terms.len() as f32
    }
}

fn count_hits(haystack: &str, terms: &[&str]) -> usize {
    terms.iter().filter(|t| haystack.contains(*t)).count()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_incident() {
        let reasoner = LocalReasoner::new();
        let schema = reasoner.classify(
            "The ECS task failed outbound HTTPS with a timeout. Fixed by adding an egress rule.",
        );
        assert_eq!(schema, Schema::Incident);
    }

    #[test]
    fn classifies_decision() {
        let reasoner = LocalReasoner::new();
        let schema = reasoner.classify(
            "We decided to go with Postgres instead of DynamoDB after weighing each option.",
        );
        assert_eq!(schema, Schema::Decision);
    }

    #[test]
    fn classifies_snippet_from_code_fence() {
        let reasoner = LocalReasoner::new();
        let schema = reasoner.classify("Here is the helper:\n```rust\nfn add(a: i32) {}\n```");
        assert_eq!(schema, Schema::Snippet);
    }

    #[test]
    fn defaults_to_process() {
        let reasoner = LocalReasoner::new();
        let schema = reasoner.classify("Weekly steps for rotating the on-call schedule.");
        assert_eq!(schema, Schema::Process);
    }

    #[test]
    fn summary_always_parses() {
        let reasoner = LocalReasoner::new();
        let text = reasoner.summarise(
            "The deploy broke. Fix the pipeline. Restart workers.",
            Schema::Incident,
            Some("infra"),
        );
        let summary = StructuredSummary::parse(&text).unwrap();
        assert_eq!(summary.doc_type, "incident");
        assert_eq!(summary.project, "infra");
    }

    #[test]
    fn score_pair_prefers_matching_documents() {
        let reasoner = LocalReasoner::new();
        let hit = reasoner.score_pair("egress timeout", "the egress rule caused a timeout");
        let miss = reasoner.score_pair("egress timeout", "notes about lunch options");
        assert!(hit > miss);
        assert!(miss.abs() < 1e-6);
    }

    #[test]
    fn score_pair_empty_inputs() {
        let reasoner = LocalReasoner::new();
        assert_eq!(reasoner.score_pair("", "doc"), 0.0);
        assert_eq!(reasoner.score_pair("query", ""), 0.0);
    }
}
