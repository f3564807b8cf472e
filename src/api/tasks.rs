//! Task endpoints
//!
//! Every call goes through [`ResilientHttpClient`], so expired credentials
//! are refreshed transparently and transient failures retried. Successful
//! changes are recorded in the user's [`TaskHistory`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::client::ResilientHttpClient;
use crate::api::pipeline::RequestOptions;
use crate::core::history::{TaskEventKind, TaskHistory};
use crate::core::session::deserialize_id;
use crate::error::{Result, VoxtaskError};

const TASKS_ENDPOINT: &str = "/tasks";
const STATS_ENDPOINT: &str = "/tasks/stats";

/// A task as the backend returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Backend id
    #[serde(alias = "_id", deserialize_with = "deserialize_id")]
    pub id: String,
    /// What to do
    pub text: String,
    /// Whether it is completed
    #[serde(default)]
    pub done: bool,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Filters and paging for listing tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskQuery {
    /// 1-based page
    pub page: Option<u32>,
    /// Page size
    pub limit: Option<u32>,
    /// Only completed (`true`) or pending (`false`) tasks
    pub done: Option<bool>,
}

impl TaskQuery {
    fn apply(&self, mut options: RequestOptions) -> RequestOptions {
        if let Some(page) = self.page {
            options = options.with_query("page", page);
        }
        if let Some(limit) = self.limit {
            options = options.with_query("limit", limit);
        }
        if let Some(done) = self.done {
            options = options.with_query("done", done);
        }
        options
    }
}

/// Fields to change on a task; unset fields are left alone
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskUpdate {
    /// New text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// New completion state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

/// Task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// All tasks
    pub total: u64,
    /// Completed tasks
    pub completed: u64,
    /// Open tasks
    pub pending: u64,
}

#[derive(Deserialize)]
struct RawStats {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default, alias = "done")]
    completed: Option<u64>,
    #[serde(default, alias = "open")]
    pending: Option<u64>,
}

impl TaskStats {
    /// Decode stats, filling whichever counter the backend left out
    pub fn from_value(body: Value) -> Result<Self> {
        let raw: RawStats = serde_json::from_value(unwrap_envelope(body, &["stats"]))
            .map_err(|e| VoxtaskError::Json(format!("Unexpected stats response: {}", e)))?;

        let completed = raw.completed.unwrap_or(0);
        let pending = raw.pending.unwrap_or_else(|| {
            raw.total.map(|t| t.saturating_sub(completed)).unwrap_or(0)
        });
        Ok(Self {
            total: raw.total.unwrap_or(completed + pending),
            completed,
            pending,
        })
    }
}

/// Canonical task list out of whatever shape the backend used
///
/// Compatibility shim: the backend has answered with a bare array,
/// `{ success, data: [...] }` and `{ tasks: [...] }` over time. Anything
/// else yields an empty list, unless it carries an `error`.
pub fn normalize_task_list(body: Value) -> Result<Vec<Task>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            match ["tasks", "data"]
                .iter()
                .find_map(|key| match obj.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                }) {
                Some(items) => items,
                None => {
                    if let Some(error) = obj.get("error").and_then(Value::as_str) {
                        return Err(VoxtaskError::Custom(error.to_string()));
                    }
                    Vec::new()
                }
            }
        }
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| VoxtaskError::Json(format!("Unexpected task in list: {}", e)))
        })
        .collect()
}

/// Strip a `{ data }` (or named) wrapper around a single resource
fn unwrap_envelope(body: Value, keys: &[&str]) -> Value {
    match body {
        Value::Object(mut obj) => {
            for key in keys.iter().copied().chain(["data"]) {
                if obj.get(key).is_some_and(Value::is_object) {
                    return obj.remove(key).unwrap_or(Value::Null);
                }
            }
            Value::Object(obj)
        }
        other => other,
    }
}

fn parse_task(body: Value) -> Result<Task> {
    serde_json::from_value(unwrap_envelope(body, &["task"]))
        .map_err(|e| VoxtaskError::Json(format!("Unexpected task response: {}", e)))
}

/// Task operations for the logged-in user
pub struct TaskService {
    client: Arc<ResilientHttpClient>,
    history: Arc<TaskHistory>,
}

impl TaskService {
    /// Create a service over the shared client
    pub fn new(client: Arc<ResilientHttpClient>, history: Arc<TaskHistory>) -> Self {
        Self { client, history }
    }

    /// Recent activity of the logged-in user
    pub fn history(&self) -> &TaskHistory {
        &self.history
    }

    /// List tasks
    pub async fn list(&self, query: TaskQuery) -> Result<Vec<Task>> {
        let body = self
            .client
            .call(TASKS_ENDPOINT, query.apply(RequestOptions::get()))
            .await?;
        normalize_task_list(body)
    }

    /// Fetch one task
    pub async fn get(&self, id: &str) -> Result<Task> {
        let body = self
            .client
            .call(&task_endpoint(id)?, RequestOptions::get())
            .await?;
        parse_task(body)
    }

    /// Create a task
    pub async fn create(&self, text: &str) -> Result<Task> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoxtaskError::InvalidInput("Task text cannot be empty".to_string()));
        }
        let body = self
            .client
            .call(TASKS_ENDPOINT, RequestOptions::post(json!({ "text": text })))
            .await?;
        let task = parse_task(body)?;
        self.history
            .record(TaskEventKind::Created, &task.id, Some(&task.text));
        Ok(task)
    }

    /// Change a task's text or completion state
    ///
    /// Only completion changes show up in the history.
    pub async fn update(&self, id: &str, update: &TaskUpdate) -> Result<Task> {
        let body = self
            .client
            .call(&task_endpoint(id)?, RequestOptions::patch(json!(update)))
            .await?;
        let task = parse_task(body)?;
        if update.done.is_some() {
            let kind = if task.done {
                TaskEventKind::Completed
            } else {
                TaskEventKind::Uncompleted
            };
            self.history.record(kind, &task.id, Some(&task.text));
        }
        Ok(task)
    }

    /// Delete a task
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.client
            .call(&task_endpoint(id)?, RequestOptions::delete())
            .await?;
        self.history.record(TaskEventKind::Deleted, id.trim(), None);
        Ok(())
    }

    /// Task counters
    pub async fn stats(&self) -> Result<TaskStats> {
        let body = self.client.call(STATS_ENDPOINT, RequestOptions::get()).await?;
        TaskStats::from_value(body)
    }
}

fn task_endpoint(id: &str) -> Result<String> {
    let id = id.trim();
    if id.is_empty() || id.contains(['/', '?', '#']) {
        return Err(VoxtaskError::InvalidInput(format!("Invalid task id '{}'", id)));
    }
    Ok(format!("{}/{}", TASKS_ENDPOINT, id))
}
