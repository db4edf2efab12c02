//! Session Manager
//!
//! Transient per-session state fed by command events from the CLI
//! collaborators. Each command refines a `project_hint`; when its
//! confidence crosses the prefetch threshold the caller is told once, so
//! it can trigger pool warm-up. Events append to a per-session JSONL
//! transcript under `session_log_dir/`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// In-memory events kept per session; the transcript on disk is unbounded.
const EVENT_LOG_CAP: usize = 100;

/// A project guess with confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectHint {
    pub project_id: String,
    pub confidence: f32,
}

/// One recorded command event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub command: String,
}

/// Transient session state.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub project_hint: Option<ProjectHint>,
    pub events: Vec<SessionEvent>,
}

/// Owns the session map and the hint heuristic.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    log_dir: PathBuf,
    prefetch_threshold: f32,
}

impl SessionManager {
    pub fn new(log_dir: PathBuf, prefetch_threshold: f32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            log_dir,
            prefetch_threshold,
        }
    }

    /// Start a session; returns its id.
    pub fn start_session(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            session_id: session_id.clone(),
            started_at: now,
            updated_at: now,
            project_hint: None,
            events: Vec::new(),
        };
        self.lock()?.insert(session_id.clone(), session);
        Ok(session_id)
    }

    /// Record a command event. Returns the project hint when this event
    /// pushed its confidence across the prefetch threshold - exactly once
    /// per crossing, so the caller can fire warm-up without debouncing.
    pub fn add_command(
        &self,
        session_id: &str,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<Option<ProjectHint>> {
        let now = Utc::now();
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;

        session.updated_at = now;
        session.events.push(SessionEvent {
            at: now,
            command: command.to_string(),
        });
        if session.events.len() > EVENT_LOG_CAP {
            session.events.remove(0);
        }

        let previously_over = session
            .project_hint
            .as_ref()
            .is_some_and(|h| h.confidence >= self.prefetch_threshold);

        if let Some((project, confidence)) = infer_project(command, cwd) {
            let hint = match session.project_hint.take() {
                Some(existing) if existing.project_id == project => ProjectHint {
                    project_id: project,
                    confidence: (existing.confidence + 0.1).max(confidence).min(1.0),
                },
                _ => ProjectHint {
                    project_id: project,
                    confidence,
                },
            };
            session.project_hint = Some(hint);
        }

        self.append_transcript(session_id, command, now);

        let hint = session.project_hint.clone();
        drop(sessions);
        match hint {
            Some(hint) if hint.confidence >= self.prefetch_threshold && !previously_over => {
                Ok(Some(hint))
            }
            _ => Ok(None),
        }
    }

    /// Close a session and drop its state. The transcript stays on disk.
    pub fn end_session(&self, session_id: &str) -> Result<Session> {
        self.lock()?
            .remove(session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))
    }

    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.lock()?.get(session_id).cloned())
    }

    pub fn active_count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Append one event line to the session transcript. Best-effort; a
    /// failed write never fails the command event.
    fn append_transcript(&self, session_id: &str, command: &str, at: DateTime<Utc>) {
        let line = serde_json::json!({ "at": at.to_rfc3339(), "command": command });
        let path = self.log_dir.join(format!("{}.jsonl", session_id));
        let result = std::fs::create_dir_all(&self.log_dir).and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| writeln!(file, "{}", line))
        });
        if let Err(e) = result {
            warn!(session_id, error = %e, "transcript append failed");
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| CoreError::Init("session map lock poisoned".to_string()))
    }
}

/// Infer a project id from a command event. Explicit `project:<name>`
/// markers are strongest, the working directory next, a `cd` target last.
fn infer_project(command: &str, cwd: Option<&str>) -> Option<(String, f32)> {
    for token in command.split_whitespace() {
        if let Some(name) = token.strip_prefix("project:") {
            if !name.is_empty() {
                return Some((name.to_string(), 0.9));
            }
        }
    }
    if let Some(cwd) = cwd {
        if let Some(name) = last_path_component(cwd) {
            return Some((name, 0.8));
        }
    }
    let mut tokens = command.split_whitespace();
    if tokens.next() == Some("cd") {
        if let Some(target) = tokens.next() {
            if let Some(name) = last_path_component(target) {
                return Some((name, 0.6));
            }
        }
    }
    None
}

fn last_path_component(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty() && n != "/" && n != "." && n != "..")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (SessionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SessionManager::new(dir.path().to_path_buf(), 0.7), dir)
    }

    #[test]
    fn session_lifecycle() {
        let (manager, _dir) = manager();
        let id = manager.start_session().unwrap();
        assert_eq!(manager.active_count().unwrap(), 1);
        manager.add_command(&id, "ls -la", None).unwrap();
        let session = manager.get(&id).unwrap().unwrap();
        assert_eq!(session.events.len(), 1);
        manager.end_session(&id).unwrap();
        assert_eq!(manager.active_count().unwrap(), 0);
        assert!(manager.get(&id).unwrap().is_none());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let (manager, _dir) = manager();
        assert!(matches!(
            manager.add_command("nope", "ls", None),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            manager.end_session("nope"),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn cwd_sets_project_hint_and_triggers_once() {
        let (manager, _dir) = manager();
        let id = manager.start_session().unwrap();
        let hint = manager
            .add_command(&id, "cargo build", Some("/home/dev/infra"))
            .unwrap();
        // 0.8 >= 0.7: crossing reported
        let hint = hint.expect("hint crossing");
        assert_eq!(hint.project_id, "infra");

        // Still over threshold: not reported again
        let again = manager
            .add_command(&id, "cargo test", Some("/home/dev/infra"))
            .unwrap();
        assert!(again.is_none());
        let session = manager.get(&id).unwrap().unwrap();
        assert!(session.project_hint.unwrap().confidence > 0.8);
    }

    #[test]
    fn cd_target_is_a_weak_hint() {
        let (manager, _dir) = manager();
        let id = manager.start_session().unwrap();
        let hint = manager.add_command(&id, "cd ~/work/backend", None).unwrap();
        // 0.6 < 0.7: no crossing yet
        assert!(hint.is_none());
        let session = manager.get(&id).unwrap().unwrap();
        assert_eq!(session.project_hint.unwrap().project_id, "backend");

        // Repetition builds confidence past the threshold
        let hint = manager.add_command(&id, "cd ~/work/backend", None).unwrap();
        assert!(hint.is_some());
    }

    #[test]
    fn explicit_marker_wins() {
        let (manager, _dir) = manager();
        let id = manager.start_session().unwrap();
        let hint = manager
            .add_command(&id, "note project:payments refactor", Some("/tmp/elsewhere"))
            .unwrap()
            .unwrap();
        assert_eq!(hint.project_id, "payments");
        assert!((hint.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn project_switch_resets_confidence() {
        let (manager, _dir) = manager();
        let id = manager.start_session().unwrap();
        manager
            .add_command(&id, "x", Some("/home/dev/alpha"))
            .unwrap();
        manager
            .add_command(&id, "x", Some("/home/dev/beta"))
            .unwrap();
        let session = manager.get(&id).unwrap().unwrap();
        let hint = session.project_hint.unwrap();
        assert_eq!(hint.project_id, "beta");
        assert!((hint.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn transcript_is_appended() {
        let (manager, dir) = manager();
        let id = manager.start_session().unwrap();
        manager.add_command(&id, "first", None).unwrap();
        manager.add_command(&id, "second", None).unwrap();
        let path = dir.path().join(format!("{}.jsonl", id));
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("first"));
    }

    #[test]
    fn event_log_is_bounded() {
        let (manager, _dir) = manager();
        let id = manager.start_session().unwrap();
        for i in 0..(EVENT_LOG_CAP + 20) {
            manager.add_command(&id, &format!("cmd {}", i), None).unwrap();
        }
        let session = manager.get(&id).unwrap().unwrap();
        assert_eq!(session.events.len(), EVENT_LOG_CAP);
    }
}
