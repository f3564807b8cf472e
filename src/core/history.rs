//! Recent task activity
//!
//! A short log of what the logged-in user did to their tasks: creations,
//! completions and deletions. Each user has their own log, persisted as
//! `history-<user id>.json` next to the config file. The log holds at most
//! [`MAX_EVENTS`] entries, newest first, and entries older than
//! [`RETENTION_DAYS`] are dropped when it is loaded.
//!
//! The log follows the session: when the user changes or logs out, the
//! in-memory events are dropped and the new user's log is loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, VoxtaskError};

/// Most events kept per user
pub const MAX_EVENTS: usize = 20;

/// Events older than this many days are dropped on load
pub const RETENTION_DAYS: i64 = 7;

/// What happened to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEventKind {
    /// Task was added
    Created,
    /// Task was marked as done
    Completed,
    /// Task was marked as not done
    Uncompleted,
    /// Task was deleted
    Deleted,
}

impl TaskEventKind {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            TaskEventKind::Created => "Created",
            TaskEventKind::Completed => "Completed",
            TaskEventKind::Uncompleted => "Marked as pending",
            TaskEventKind::Deleted => "Deleted",
        }
    }
}

/// One history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    /// What happened
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    /// Affected task
    pub task_id: String,
    /// Task text at the time, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_text: Option<String>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Owner of the log
    pub user_id: String,
}

/// Who the current user is, if anyone
pub trait UserSource: Send + Sync {
    /// Id of the logged-in user
    fn current_user_id(&self) -> Option<String>;
}

#[derive(Debug, Default)]
struct HistoryState {
    user_id: Option<String>,
    events: Vec<TaskEvent>,
}

/// Per-user task activity log
pub struct TaskHistory {
    dir: Option<PathBuf>,
    users: Arc<dyn UserSource>,
    state: Mutex<HistoryState>,
}

impl std::fmt::Debug for TaskHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHistory")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl TaskHistory {
    /// History persisted under `dir`, or kept in memory when `dir` is `None`
    pub fn new(dir: Option<PathBuf>, users: Arc<dyn UserSource>) -> Self {
        Self {
            dir,
            users,
            state: Mutex::new(HistoryState::default()),
        }
    }

    /// History that is never written to disk
    pub fn in_memory(users: Arc<dyn UserSource>) -> Self {
        Self::new(None, users)
    }

    /// Events of the current user, newest first
    pub fn events(&self) -> Vec<TaskEvent> {
        self.sync(Utc::now()).events.clone()
    }

    /// Record an event for the current user; ignored when nobody is logged in
    pub fn record(&self, kind: TaskEventKind, task_id: &str, task_text: Option<&str>) {
        self.record_at(kind, task_id, task_text, Utc::now());
    }

    fn record_at(
        &self,
        kind: TaskEventKind,
        task_id: &str,
        task_text: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let mut state = self.sync(at);
        let Some(user_id) = state.user_id.clone() else {
            debug!(?kind, "no user, history event dropped");
            return;
        };

        state.events.insert(
            0,
            TaskEvent {
                kind,
                task_id: task_id.to_string(),
                task_text: task_text.map(str::to_string),
                timestamp: at,
                user_id: user_id.clone(),
            },
        );
        state.events.truncate(MAX_EVENTS);

        if let Err(e) = self.persist(&user_id, &state.events) {
            warn!(error = %e, "could not save task history");
        }
    }

    /// Forget the current user's events
    pub fn clear(&self) -> Result<()> {
        let mut state = self.sync(Utc::now());
        state.events.clear();
        match state.user_id.clone() {
            Some(user_id) => self.persist(&user_id, &[]),
            None => Ok(()),
        }
    }

    /// Bring the in-memory log in line with whoever is logged in now
    fn sync(&self, now: DateTime<Utc>) -> MutexGuard<'_, HistoryState> {
        let current = self.users.current_user_id();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.user_id != current {
            debug!(user = ?current, "task history switching user");
            state.events = match &current {
                Some(user_id) => self.load(user_id, now),
                None => Vec::new(),
            };
            state.user_id = current;
        }
        state
    }

    fn load(&self, user_id: &str, now: DateTime<Utc>) -> Vec<TaskEvent> {
        let Some(path) = self.path_for(user_id) else {
            return Vec::new();
        };

        let saved = match read_events(&path) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable task history");
                return Vec::new();
            }
        };

        let cutoff = now - Duration::days(RETENTION_DAYS);
        let mut events: Vec<TaskEvent> = saved
            .iter()
            .filter(|event| event.user_id == user_id && event.timestamp > cutoff)
            .cloned()
            .collect();
        events.truncate(MAX_EVENTS);

        if events.len() != saved.len() {
            if let Err(e) = self.persist(user_id, &events) {
                warn!(error = %e, "could not prune task history");
            }
        }
        events
    }

    fn persist(&self, user_id: &str, events: &[TaskEvent]) -> Result<()> {
        let Some(path) = self.path_for(user_id) else {
            return Ok(());
        };

        if events.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(events)?)?;
        Ok(())
    }

    fn path_for(&self, user_id: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(file_name(user_id)))
    }
}

fn read_events(path: &Path) -> Result<Vec<TaskEvent>> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| VoxtaskError::Storage(format!("History file is corrupt: {}", e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// `history-<id>.json`, with anything outside `[A-Za-z0-9_-]` replaced
fn file_name(user_id: &str) -> String {
    let safe: String = user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("history-{}.json", safe)
}
