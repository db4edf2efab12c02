//! SQLite database handle and migrations.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::error::{CoreError, Result};

/// A database migration.
#[derive(Debug, Clone)]
struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: vector records, chunk FTS, consolidation history",
    up: MIGRATION_V1_UP,
}];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS vector_records (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL,
    is_memory_entry INTEGER NOT NULL,
    project_id TEXT,
    tier TEXT NOT NULL DEFAULT 'working',
    timestamp TEXT NOT NULL,
    document TEXT NOT NULL,
    embedding BLOB NOT NULL,
    metadata TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vector_memory ON vector_records(memory_id);
CREATE INDEX IF NOT EXISTS idx_vector_entry ON vector_records(is_memory_entry);
CREATE INDEX IF NOT EXISTS idx_vector_project ON vector_records(project_id);
CREATE INDEX IF NOT EXISTS idx_vector_tier ON vector_records(tier);

CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
    chunk_id UNINDEXED,
    memory_id UNINDEXED,
    content,
    tokenize='porter unicode61'
);

CREATE TABLE IF NOT EXISTS consolidation_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_at TEXT NOT NULL,
    migrated INTEGER NOT NULL,
    clusters_formed INTEGER NOT NULL,
    representatives INTEGER NOT NULL,
    compressed INTEGER NOT NULL,
    forgotten INTEGER NOT NULL,
    orphans_removed INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// One row of the consolidation history table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsolidationHistoryRecord {
    pub run_at: DateTime<Utc>,
    pub migrated: i64,
    pub clusters_formed: i64,
    pub representatives: i64,
    pub compressed: i64,
    pub forgotten: i64,
    pub orphans_removed: i64,
    pub duration_ms: i64,
}

/// Process-wide SQLite handle. The single connection lives behind a mutex;
/// async callers wrap access in `spawn_blocking`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        let has_version_table: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |row| row.get(0),
        )?;
        let current: u32 = if has_version_table {
            conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )?
        } else {
            0
        };

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![migration.version, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    }

    /// Run a closure with the locked connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run a closure inside a transaction; rolls back on error.
    pub fn with_tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Init("database lock poisoned".to_string()))
    }

    /// Append one consolidation run to the history table.
    pub fn record_consolidation(&self, record: &ConsolidationHistoryRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO consolidation_history
                 (run_at, migrated, clusters_formed, representatives, compressed,
                  forgotten, orphans_removed, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    record.run_at.to_rfc3339(),
                    record.migrated,
                    record.clusters_formed,
                    record.representatives,
                    record.compressed,
                    record.forgotten,
                    record.orphans_removed,
                    record.duration_ms,
                ],
            )?;
            Ok(())
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
