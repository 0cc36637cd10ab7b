//! Append-only task status history.

use super::Database;
use crate::error::{Entity, PlanError, PlanResult};
use crate::types::{NewHistory, TaskHistory};
use rusqlite::{Connection, Row, params};

fn parse_history_row(row: &Row) -> rusqlite::Result<TaskHistory> {
    Ok(TaskHistory {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        old_status: row.get("old_status")?,
        new_status: row.get("new_status")?,
        agent: row.get("agent")?,
        notes: row.get("notes")?,
        forced: row.get("forced")?,
        timestamp: row.get("timestamp")?,
    })
}

/// Record one status change. Rows are never updated afterwards.
pub fn insert_history(conn: &Connection, entry: &NewHistory) -> PlanResult<TaskHistory> {
    conn.execute(
        "INSERT INTO task_history (task_id, old_status, new_status, agent, notes, forced, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.task_id,
            entry.old_status,
            entry.new_status,
            entry.agent,
            entry.notes,
            entry.forced,
            entry.timestamp,
        ],
    )?;

    Ok(TaskHistory {
        id: conn.last_insert_rowid(),
        task_id: entry.task_id,
        old_status: entry.old_status.clone(),
        new_status: entry.new_status.clone(),
        agent: entry.agent.clone(),
        notes: entry.notes.clone(),
        forced: entry.forced,
        timestamp: entry.timestamp,
    })
}

pub fn list_history(conn: &Connection, task_id: i64) -> PlanResult<Vec<TaskHistory>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, old_status, new_status, agent, notes, forced, timestamp
         FROM task_history WHERE task_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![task_id], parse_history_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

impl Database {
    /// Status history of a task, oldest first.
    pub fn get_task_history(&self, task_key: &str) -> PlanResult<Vec<TaskHistory>> {
        self.with_conn(|conn| {
            let task = super::tasks::get_task_by_key(conn, task_key)?
                .ok_or_else(|| PlanError::not_found(Entity::Task, task_key))?;
            list_history(conn, task.id)
        })
    }

    /// Total history rows, across all tasks.
    pub fn count_history(&self) -> PlanResult<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM task_history", [], |row| row.get(0))?;
            Ok(count)
        })
    }
}
