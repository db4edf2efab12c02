//! Structured Summary Contract
//!
//! The summariser must emit exactly this shape (leading/trailing whitespace
//! tolerated, line order fixed):
//!
//! ```text
//! Topic: <non-empty>
//! DocType: <incident|decision|checklist|guide|snippet|process|...>
//! Project: <name or "Unknown">
//! KeyActions:
//! - <imperative line>
//! ```
//!
//! Downstream rerank features, project-hint extraction, and the summary
//! search path all depend on this shape. Validation happens before
//! persistence; a non-conforming summary triggers one stricter retry, then
//! the deterministic fallback built here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verbs accepted as the head of an imperative clause by the fallback
/// extractor. Lowercased, matched against the first word of a sentence.
const IMPERATIVE_VERBS: &[&str] = &[
    "add", "apply", "build", "change", "check", "configure", "create", "debug", "delete",
    "deploy", "disable", "document", "enable", "fix", "install", "merge", "migrate", "move",
    "open", "patch", "rebuild", "remove", "rename", "restart", "revert", "review", "rotate",
    "run", "set", "test", "update", "upgrade", "use", "verify",
];

/// Summary validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryParseError {
    #[error("missing or misplaced line: {0}")]
    MissingLine(&'static str),
    #[error("Topic must be non-empty")]
    EmptyTopic,
    #[error("KeyActions must contain at least one '- ' item")]
    EmptyKeyActions,
    #[error("KeyActions item {0} does not start with '- '")]
    MalformedAction(usize),
}

/// Parsed structured summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub topic: String,
    pub doc_type: String,
    pub project: String,
    pub key_actions: Vec<String>,
}

impl StructuredSummary {
    /// Validate and parse summariser output against the grammar.
    pub fn parse(text: &str) -> Result<Self, SummaryParseError> {
        let mut lines = text.trim().lines().map(str::trim_end);

        let topic = field_line(lines.next(), "Topic:")?;
        if topic.is_empty() {
            return Err(SummaryParseError::EmptyTopic);
        }
        let doc_type = field_line(lines.next(), "DocType:")?;
        let project = field_line(lines.next(), "Project:")?;

        match lines.next().map(str::trim) {
            Some("KeyActions:") => {}
            _ => return Err(SummaryParseError::MissingLine("KeyActions:")),
        }

        let mut key_actions = Vec::new();
        for (i, line) in lines.enumerate() {
            let line = line.trim_start();
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix("- ") {
                Some(action) if !action.trim().is_empty() => {
                    key_actions.push(action.trim().to_string());
                }
                _ => return Err(SummaryParseError::MalformedAction(i)),
            }
        }
        if key_actions.is_empty() {
            return Err(SummaryParseError::EmptyKeyActions);
        }

        Ok(Self {
            topic,
            doc_type: if doc_type.is_empty() { "process".into() } else { doc_type },
            project: if project.is_empty() { "Unknown".into() } else { project },
            key_actions,
        })
    }

    /// Deterministic fallback: first sentence as topic, up to three
    /// extracted imperative clauses as actions.
    pub fn fallback(content: &str, doc_type: &str, project: Option<&str>) -> Self {
        let topic = first_sentence(content);
        let mut key_actions: Vec<String> = imperative_clauses(content);
        key_actions.truncate(3);
        if key_actions.is_empty() {
            key_actions.push("(no actions recorded)".to_string());
        }
        Self {
            topic,
            doc_type: doc_type.to_string(),
            project: project.unwrap_or("Unknown").to_string(),
            key_actions,
        }
    }

    /// Text used for the metadata entry's embedding: the full rendered
    /// summary, which is what the structured-summary search path indexes.
    pub fn embedding_text(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for StructuredSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Topic: {}", self.topic)?;
        writeln!(f, "DocType: {}", self.doc_type)?;
        writeln!(f, "Project: {}", self.project)?;
        writeln!(f, "KeyActions:")?;
        for (i, action) in self.key_actions.iter().enumerate() {
            if i + 1 == self.key_actions.len() {
                write!(f, "- {}", action)?;
            } else {
                writeln!(f, "- {}", action)?;
            }
        }
        Ok(())
    }
}

fn field_line(line: Option<&str>, prefix: &'static str) -> Result<String, SummaryParseError> {
    match line.map(str::trim_start) {
        Some(l) if l.starts_with(prefix) => Ok(l[prefix.len()..].trim().to_string()),
        _ => Err(SummaryParseError::MissingLine(prefix)),
    }
}

/// First sentence of the content, capped at 120 characters on a char
/// boundary.
fn first_sentence(content: &str) -> String {
    let trimmed = content.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    let sentence = trimmed[..end].trim();
    let capped: String = sentence.chars().take(120).collect();
    if capped.is_empty() {
        "(empty conversation)".to_string()
    } else {
        capped
    }
}

/// Extract clauses whose first word is an imperative verb.
fn imperative_clauses(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in content.split(|c| matches!(c, '.' | '\n' | ';')) {
        let clause = raw.trim().trim_start_matches(|c: char| !c.is_alphanumeric()).trim();
        let Some(first) = clause.split_whitespace().next() else {
            continue;
        };
        if IMPERATIVE_VERBS.contains(&first.to_lowercase().as_str()) && clause.len() > first.len() {
            let capped: String = clause.chars().take(100).collect();
            out.push(capped);
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
