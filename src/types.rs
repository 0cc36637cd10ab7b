//! Core types for the plan hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lowest accepted task priority.
pub const PRIORITY_MIN: i32 = 1;
/// Highest accepted task priority.
pub const PRIORITY_MAX: i32 = 10;
/// Priority used when the caller does not pass one.
pub const PRIORITY_DEFAULT: i32 = 5;

/// Agent type assigned when the caller leaves it unset.
pub const DEFAULT_AGENT_TYPE: &str = "general";

/// Top-level work item (`E{NN}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: i64,
    pub key: String,
    pub title: String,
    pub slug: Option<String>,
    pub file_path: Option<String>,
    pub custom_folder_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Feature within an epic (`E{NN}-F{NN}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub epic_id: i64,
    pub key: String,
    pub title: String,
    pub slug: Option<String>,
    pub file_path: Option<String>,
    pub custom_folder_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task within a feature (`T-E{NN}-F{NN}-{NNN}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub feature_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub agent_type: String,
    pub priority: i32,
    pub depends_on: Vec<String>,
    /// Project-root-relative markdown path; `None` once reassigned away.
    pub file_path: Option<String>,
    pub execution_order: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record of one status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: i64,
    /// `None` on the creation record.
    pub old_status: Option<String>,
    pub new_status: String,
    pub agent: Option<String>,
    pub notes: Option<String>,
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

/// Input for creating an epic.
#[derive(Debug, Clone, Default)]
pub struct NewEpic {
    pub key: String,
    pub title: String,
    pub slug: Option<String>,
    pub file_path: Option<String>,
    pub custom_folder_path: Option<String>,
}

/// Input for creating a feature. `key` may be short (`F02`) or full (`E01-F02`).
#[derive(Debug, Clone, Default)]
pub struct NewFeature {
    pub epic_key: String,
    pub key: String,
    pub title: String,
    pub slug: Option<String>,
    pub file_path: Option<String>,
    pub custom_folder_path: Option<String>,
}

/// Fully resolved task row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub feature_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub agent_type: String,
    pub priority: i32,
    pub depends_on: Vec<String>,
    pub file_path: Option<String>,
    pub execution_order: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// History row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewHistory {
    pub task_id: i64,
    pub old_status: Option<String>,
    pub new_status: String,
    pub agent: Option<String>,
    pub notes: Option<String>,
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

/// A request to move a task to another status.
#[derive(Debug, Clone, Default)]
pub struct StatusChangeRequest {
    pub task_key: String,
    pub new_status: String,
    pub reason: Option<String>,
    pub force: bool,
}

/// Caller input for task creation, built once per invocation.
#[derive(Debug, Clone)]
pub struct CreateTaskInput {
    pub epic_key: String,
    /// Short (`F02`) or full (`E01-F02`) feature key.
    pub feature_key: String,
    pub title: String,
    pub description: Option<String>,
    /// `None` selects the configured default agent type.
    pub agent_type: Option<String>,
    /// Template file that replaces agent-based selection.
    pub template: Option<PathBuf>,
    pub priority: i32,
    /// Comma-separated task keys.
    pub depends_on: Option<String>,
    pub execution_order: Option<i32>,
    /// Caller-chosen key instead of the next sequence number.
    pub custom_key: Option<String>,
    /// Project-relative markdown path instead of the default layout.
    pub filename: Option<String>,
    /// Take over a file path already claimed by another task.
    pub force: bool,
}

impl Default for CreateTaskInput {
    fn default() -> Self {
        Self {
            epic_key: String::new(),
            feature_key: String::new(),
            title: String::new(),
            description: None,
            agent_type: None,
            template: None,
            priority: PRIORITY_DEFAULT,
            depends_on: None,
            execution_order: None,
            custom_key: None,
            filename: None,
            force: false,
        }
    }
}

/// Inputs resolved by validation, reused as-is by creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTaskData {
    pub epic_id: i64,
    pub epic_key: String,
    pub feature_id: i64,
    pub feature_key: String,
    pub agent_type: String,
    pub dependencies: Vec<String>,
}

/// Outcome of a successful task creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedTask {
    pub task: Task,
    /// Absolute path of the task's markdown file.
    pub file_path: PathBuf,
    /// Whether this call wrote the file (false when it already existed).
    pub file_written: bool,
    /// Task whose file claim was taken over with `force`.
    pub reassigned_from: Option<String>,
}
