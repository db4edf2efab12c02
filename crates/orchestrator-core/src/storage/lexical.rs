//! Lexical index L.
//!
//! FTS5 over chunk text with porter stemming and `bm25()` ranking. The
//! posting lists persist inside the SQLite file, so the index restores from
//! disk for free. Rows are inserted and deleted explicitly by the indexer
//! and the consolidation service - never by triggers.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::params;

use super::sqlite::Database;
use crate::error::Result;

/// One lexical search hit. Score is positive, higher is better.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub memory_id: String,
    pub content: String,
    pub score: f32,
}

/// The lexical index over chunk text.
pub struct LexicalIndex {
    db: Arc<Database>,
}

impl LexicalIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert chunk rows. Existing rows for the same chunk ids are
    /// replaced.
    pub fn insert(&self, rows: &[(String, String, String)]) -> Result<()> {
        self.db.with_tx(|tx| {
            for (chunk_id, memory_id, content) in rows {
                tx.execute(
                    "DELETE FROM chunk_fts WHERE chunk_id = ?1",
                    params![chunk_id],
                )?;
                tx.execute(
                    "INSERT INTO chunk_fts (chunk_id, memory_id, content) VALUES (?1, ?2, ?3)",
                    params![chunk_id, memory_id, content],
                )?;
            }
            Ok(())
        })
    }

    /// Delete all rows of a memory. Idempotent.
    pub fn delete_by_memory_id(&self, memory_id: &str) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM chunk_fts WHERE memory_id = ?1",
                params![memory_id],
            )?;
            Ok(removed)
        })
    }

    /// Delete specific chunk rows. Idempotent.
    pub fn delete_chunks(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut removed = 0usize;
        self.db.with_tx(|tx| {
            for id in chunk_ids {
                removed += tx.execute("DELETE FROM chunk_fts WHERE chunk_id = ?1", params![id])?;
            }
            Ok(())
        })?;
        Ok(removed)
    }

    /// BM25 search over chunk text.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_id, memory_id, content, bm25(chunk_fts) AS rank
                 FROM chunk_fts WHERE chunk_fts MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![sanitized, limit as i64], |row| {
                Ok(LexicalHit {
                    chunk_id: row.get(0)?,
                    memory_id: row.get(1)?,
                    content: row.get(2)?,
                    // bm25() is negative-better; flip it
                    score: -row.get::<_, f64>(3)? as f32,
                })
            })?;
            let mut hits = Vec::new();
            for row in rows {
                hits.push(row?);
            }
            Ok(hits)
        })
    }

    /// Chunk ids currently indexed, grouped by memory id. Feeds the orphan
    /// sweep.
    pub fn chunk_ids_by_memory(&self) -> Result<HashMap<String, Vec<String>>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT chunk_id, memory_id FROM chunk_fts")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut map: HashMap<String, Vec<String>> = HashMap::new();
            for row in rows {
                let (chunk_id, memory_id) = row?;
                map.entry(memory_id).or_default().push(chunk_id);
            }
            Ok(map)
        })
    }

    /// Number of indexed rows.
    pub fn len(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunk_fts", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Sanitize user input for FTS5 MATCH: strip operator syntax, quote each
/// term, join with implicit AND-of-OR semantics (OR keeps recall high for
/// multi-term queries).
pub fn sanitize_fts5_query(query: &str) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| {
            term.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    terms.join(" OR ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> LexicalIndex {
        LexicalIndex::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn seed(idx: &LexicalIndex) {
        idx.insert(&[
            (
                "m1#0".into(),
                "m1".into(),
                "security group egress was missing port 443".into(),
            ),
            (
                "m1#1".into(),
                "m1".into(),
                "added the egress rule and redeployed".into(),
            ),
            (
                "m2#0".into(),
                "m2".into(),
                "database migration rollback procedure".into(),
            ),
        ])
        .unwrap();
    }

    #[test]
    fn search_finds_matching_chunks() {
        let idx = index();
        seed(&idx);
        let hits = idx.search("egress rule", 10).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.memory_id == "m1"));
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn porter_stemming_matches_inflections() {
        let idx = index();
        seed(&idx);
        let hits = idx.search("migrations", 10).unwrap();
        assert!(hits.iter().any(|h| h.memory_id == "m2"));
    }

    #[test]
    fn operator_injection_is_neutralised() {
        let idx = index();
        seed(&idx);
        // Raw FTS5 syntax would be an error; sanitised it is just terms
        let hits = idx.search("egress AND (rule OR \"x", 10).unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let idx = index();
        seed(&idx);
        assert!(idx.search("", 10).unwrap().is_empty());
        assert!(idx.search("!!! ???", 10).unwrap().is_empty());
    }

    #[test]
    fn delete_by_memory_removes_all_rows() {
        let idx = index();
        seed(&idx);
        assert_eq!(idx.delete_by_memory_id("m1").unwrap(), 2);
        assert_eq!(idx.delete_by_memory_id("m1").unwrap(), 0);
        assert!(idx.search("egress", 10).unwrap().is_empty());
        assert_eq!(idx.len().unwrap(), 1);
    }

    #[test]
    fn delete_specific_chunks() {
        let idx = index();
        seed(&idx);
        assert_eq!(idx.delete_chunks(&["m1#0".to_string()]).unwrap(), 1);
        let hits = idx.search("egress", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "m1#1");
    }

    #[test]
    fn reinsert_replaces_row() {
        let idx = index();
        seed(&idx);
        idx.insert(&[("m1#0".into(), "m1".into(), "entirely new text".into())])
            .unwrap();
        assert_eq!(idx.len().unwrap(), 3);
        let hits = idx.search("entirely", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn chunk_ids_grouped_by_memory() {
        let idx = index();
        seed(&idx);
        let map = idx.chunk_ids_by_memory().unwrap();
        assert_eq!(map.get("m1").map(Vec::len), Some(2));
        assert_eq!(map.get("m2").map(Vec::len), Some(1));
    }

    #[test]
    fn sanitizer_quotes_terms() {
        assert_eq!(sanitize_fts5_query("hello world"), "\"hello\" OR \"world\"");
        assert_eq!(sanitize_fts5_query("NEAR(a b)"), "\"NEARa\" OR \"b\"");
        assert_eq!(sanitize_fts5_query(""), "");
    }
}
