//! Task persistence.

use super::{Database, decode_list, encode_list, now_utc};
use crate::error::{Entity, PlanError, PlanResult};
use crate::keys;
use crate::types::{NewTask, Task};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

const TASK_COLUMNS: &str = "id, feature_id, key, title, description, status, agent_type, priority, \
     depends_on, file_path, execution_order, started_at, completed_at, created_at, updated_at";

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let depends_on: Option<String> = row.get("depends_on")?;

    Ok(Task {
        id: row.get("id")?,
        feature_id: row.get("feature_id")?,
        key: row.get("key")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        agent_type: row.get("agent_type")?,
        priority: row.get("priority")?,
        depends_on: decode_list(depends_on),
        file_path: row.get("file_path")?,
        execution_order: row.get("execution_order")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_task_by_key(conn: &Connection, key: &str) -> PlanResult<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE key = ?1"),
            params![keys::normalize(key)],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

pub fn get_task_by_id(conn: &Connection, id: i64) -> PlanResult<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

pub fn task_key_exists(conn: &Connection, key: &str) -> PlanResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tasks WHERE key = ?1)",
        params![keys::normalize(key)],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Task currently claiming a project-relative file path, if any.
pub fn find_task_by_file_path(conn: &Connection, file_path: &str) -> PlanResult<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE file_path = ?1"),
            params![file_path],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

/// Drop a task's claim on its file path.
pub fn clear_task_file_path(conn: &Connection, task_id: i64) -> PlanResult<()> {
    conn.execute(
        "UPDATE tasks SET file_path = NULL, updated_at = ?1 WHERE id = ?2",
        params![now_utc(), task_id],
    )?;
    Ok(())
}

/// Highest sequence number among the canonically keyed tasks of a feature.
///
/// Matches on the `T-{epic}-{feature}-` key prefix across the whole table,
/// so a custom key spelled like another feature's canonical key still
/// counts for that feature. Other keys are ignored. Returns 0 when there
/// are none. This is a maximum, not a count, so numbers freed by deletions
/// are never reused.
pub fn max_task_number(conn: &Connection, feature_key: &str) -> PlanResult<u32> {
    let prefix = format!("T-{}-", keys::normalize(feature_key));
    let mut stmt = conn.prepare("SELECT key FROM tasks WHERE substr(key, 1, length(?1)) = ?1")?;
    let task_keys = stmt
        .query_map(params![prefix], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let max = task_keys
        .iter()
        .filter_map(|key| keys::task_number(key))
        .max()
        .unwrap_or(0);
    Ok(max)
}

/// Insert a task row and return it as stored.
pub fn insert_task(conn: &Connection, task: &NewTask) -> PlanResult<Task> {
    conn.execute(
        "INSERT INTO tasks (feature_id, key, title, description, status, agent_type, priority,
                            depends_on, file_path, execution_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            task.feature_id,
            task.key,
            task.title,
            task.description,
            task.status,
            task.agent_type,
            task.priority,
            encode_list(&task.depends_on)?,
            task.file_path,
            task.execution_order,
            task.created_at,
        ],
    )?;

    Ok(Task {
        id: conn.last_insert_rowid(),
        feature_id: task.feature_id,
        key: task.key.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        status: task.status.clone(),
        agent_type: task.agent_type.clone(),
        priority: task.priority,
        depends_on: task.depends_on.clone(),
        file_path: task.file_path.clone(),
        execution_order: task.execution_order,
        started_at: None,
        completed_at: None,
        created_at: task.created_at,
        updated_at: task.created_at,
    })
}

/// Write a new status and its lifecycle timestamps.
///
/// `started_at` and `completed_at` are only set when passed; existing values
/// are kept otherwise.
pub fn update_task_status(
    conn: &Connection,
    task_id: i64,
    status: &str,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> PlanResult<()> {
    conn.execute(
        "UPDATE tasks
         SET status = ?1,
             started_at = COALESCE(?2, started_at),
             completed_at = COALESCE(?3, completed_at),
             updated_at = ?4
         WHERE id = ?5",
        params![status, started_at, completed_at, now, task_id],
    )?;
    Ok(())
}

impl Database {
    pub fn get_task(&self, key: &str) -> PlanResult<Option<Task>> {
        self.with_conn(|conn| get_task_by_key(conn, key))
    }

    pub fn get_task_by_id(&self, id: i64) -> PlanResult<Option<Task>> {
        self.with_conn(|conn| get_task_by_id(conn, id))
    }

    /// Fetch a task or fail with a not-found error.
    pub fn require_task(&self, key: &str) -> PlanResult<Task> {
        self.get_task(key)?
            .ok_or_else(|| PlanError::not_found(Entity::Task, keys::normalize(key)))
    }

    pub fn task_exists(&self, key: &str) -> PlanResult<bool> {
        self.with_conn(|conn| task_key_exists(conn, key))
    }

    pub fn find_task_by_file_path(&self, file_path: &str) -> PlanResult<Option<Task>> {
        self.with_conn(|conn| find_task_by_file_path(conn, file_path))
    }

    /// Tasks of one feature in execution order, then key order.
    pub fn list_tasks_by_feature(&self, feature_id: i64) -> PlanResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE feature_id = ?1
                 ORDER BY execution_order IS NULL, execution_order, key"
            ))?;
            let tasks = stmt
                .query_map(params![feature_id], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Every task, ordered by key.
    pub fn list_tasks(&self) -> PlanResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY key"))?;
            let tasks = stmt
                .query_map([], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }
}
