//! Memory and chunk records.
//!
//! Id conventions: the metadata entry for memory `m` lives in the vector
//! store under `{m}-metadata`; chunk `i` lives under `{m}#{i}`. Both
//! suffixes are storage-internal - pool and reranker code always works with
//! base memory ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::summary::StructuredSummary;

/// Suffix of metadata-entry record ids in the vector store.
pub const METADATA_SUFFIX: &str = "-metadata";

// ============================================================================
// SCHEMA
// ============================================================================

/// Domain class of a memory. Closed set; immutable after ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Something broke and was diagnosed or fixed
    Incident,
    /// A reusable piece of code or configuration
    Snippet,
    /// A choice between alternatives, with rationale
    Decision,
    /// A procedure or workflow
    #[default]
    Process,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Incident => "incident",
            Schema::Snippet => "snippet",
            Schema::Decision => "decision",
            Schema::Process => "process",
        }
    }

    /// Parse from a string name, defaulting to `Process` for anything
    /// unrecognised (the classifier fallback).
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "incident" => Schema::Incident,
            "snippet" => Schema::Snippet,
            "decision" => Schema::Decision,
            _ => Schema::Process,
        }
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TIER
// ============================================================================

/// Lifecycle stage of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Hours-old, pending migration
    #[default]
    Working,
    /// Days to weeks
    #[serde(rename = "short_term")]
    ShortTerm,
    /// Indefinite
    #[serde(rename = "long_term")]
    LongTerm,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::ShortTerm => "short_term",
            Tier::LongTerm => "long_term",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "short_term" | "shortterm" => Tier::ShortTerm,
            "long_term" | "longterm" => Tier::LongTerm,
            _ => Tier::Working,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SOURCE
// ============================================================================

/// Where a conversation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Cli,
    Obsidian,
    Editor,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Cli => "cli",
            SourceKind::Obsidian => "obsidian",
            SourceKind::Editor => "editor",
        }
    }

    /// Strict parse; unknown tags are a validation error at the boundary.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cli" => Some(SourceKind::Cli),
            "obsidian" => Some(SourceKind::Obsidian),
            "editor" => Some(SourceKind::Editor),
            _ => None,
        }
    }
}

// ============================================================================
// CONVERSATION INPUT
// ============================================================================

/// The validated inbound conversation record. All downstream code consumes
/// this shape; validation happens once at the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInput {
    pub user: String,
    pub assistant: String,
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

// ============================================================================
// MEMORY
// ============================================================================

/// A single ingested conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Opaque unique id (UUID v4)
    pub id: String,
    pub schema: Schema,
    pub tier: Tier,
    /// Original concatenated conversation text
    pub content: String,
    /// Structured summary (fixed grammar)
    pub summary: StructuredSummary,
    /// External references in first-seen order
    pub refs: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    /// In [0, 1]
    pub importance: f64,
    /// In [0, 1]; decays over time, boosted by references
    pub strength: f64,
    pub project_id: Option<String>,
    /// Detected or overridden language code
    pub language: String,
    /// Open key/value bag
    pub metadata: Map<String, Value>,
    /// Set when consolidation compressed this memory into a cluster
    /// representative; holds the representative's id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_into: Option<String>,
}

impl Memory {
    /// Age in whole days relative to `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_days()
    }

    /// The metadata-entry record id for this memory.
    pub fn metadata_entry_id(&self) -> String {
        metadata_entry_id(&self.id)
    }
}

// ============================================================================
// CHUNK
// ============================================================================

/// Token-bounded retrieval unit derived from a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `{memory_id}#{chunk_index}`
    pub id: String,
    pub memory_id: String,
    /// 0-based position within the memory
    pub chunk_index: usize,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn new(memory_id: &str, chunk_index: usize, content: String) -> Self {
        Self {
            id: chunk_id(memory_id, chunk_index),
            memory_id: memory_id.to_string(),
            chunk_index,
            content,
            embedding: Vec::new(),
        }
    }
}

// ============================================================================
// ID HELPERS
// ============================================================================

/// Metadata-entry id for a memory id.
pub fn metadata_entry_id(memory_id: &str) -> String {
    format!("{}{}", memory_id, METADATA_SUFFIX)
}

/// Chunk record id for a memory id and position.
pub fn chunk_id(memory_id: &str, index: usize) -> String {
    format!("{}#{}", memory_id, index)
}

/// Normalise any vector-store record id back to its base memory id.
/// Strips the `-metadata` suffix and the `#i` chunk suffix.
pub fn memory_id_of(record_id: &str) -> &str {
    if let Some(base) = record_id.strip_suffix(METADATA_SUFFIX) {
        return base;
    }
    match record_id.rfind('#') {
        Some(pos) => &record_id[..pos],
        None => record_id,
    }
}

// ============================================================================
// TESTS
// ============================================================================
