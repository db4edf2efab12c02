//! JSON state files: `projects.json` and `bookmarks.json`.
//!
//! Both are small arrays rewritten whole on change, guarded by an advisory
//! `.lock` file so concurrent writers (the server plus a collaborator CLI)
//! do not interleave. `projects.json` appears only once projects are used.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// One entry of `projects.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub memory_count: u64,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One saved search in `bookmarks.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// FILE LOCK
// ============================================================================

/// Advisory file lock: holds `<path>.lock` for the guard's lifetime.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(target: &Path) -> Result<Self> {
        let path = target.with_extension("lock");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for _ in 0..50 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Init(format!(
            "could not acquire lock {}",
            path.display()
        )))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// ============================================================================
// PROJECTS
// ============================================================================

/// Reader/writer over `projects.json`.
pub struct ProjectsRegistry {
    path: PathBuf,
}

impl ProjectsRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<Vec<ProjectRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Bump `memory_count` for a project, creating its record on first
    /// use.
    pub fn record_ingest(&self, project_id: &str) -> Result<()> {
        self.update(project_id, |record| {
            record.memory_count += 1;
        })
    }

    /// Refresh `last_accessed` for a project-scoped search.
    pub fn record_access(&self, project_id: &str) -> Result<()> {
        self.update(project_id, |record| {
            record.last_accessed = Some(Utc::now());
        })
    }

    fn update(&self, project_id: &str, apply: impl FnOnce(&mut ProjectRecord)) -> Result<()> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut records = self.load()?;
        let now = Utc::now();
        let record = match records.iter_mut().find(|r| r.id == project_id) {
            Some(record) => record,
            None => {
                records.push(ProjectRecord {
                    id: project_id.to_string(),
                    name: project_id.to_string(),
                    description: String::new(),
                    tags: Vec::new(),
                    created_at: now,
                    updated_at: now,
                    memory_count: 0,
                    last_accessed: None,
                    metadata: Map::new(),
                });
                records.last_mut().expect("just pushed")
            }
        };
        apply(record);
        record.updated_at = now;
        std::fs::write(&self.path, serde_json::to_string_pretty(&records)?)?;
        Ok(())
    }
}

// ============================================================================
// BOOKMARKS
// ============================================================================

/// Saved searches.
pub struct BookmarkStore {
    path: PathBuf,
}

impl BookmarkStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn list(&self) -> Result<Vec<Bookmark>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Save a search; a bookmark with the same name is replaced.
    pub fn add(&self, bookmark: Bookmark) -> Result<()> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut bookmarks = self.list()?;
        bookmarks.retain(|b| b.name != bookmark.name);
        bookmarks.push(bookmark);
        std::fs::write(&self.path, serde_json::to_string_pretty(&bookmarks)?)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
