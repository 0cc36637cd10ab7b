//! Sequential task key allocation.
//!
//! The next key for a feature is the highest existing sequence number plus
//! one. Numbers freed by deleted tasks are never handed out again.

use crate::db::Database;
use crate::db::features::get_feature_by_key;
use crate::db::tasks::max_task_number;
use crate::error::{Entity, PlanError, PlanResult};
use crate::keys::{self, MAX_TASK_NUMBER};
use rusqlite::Connection;
use tracing::debug;

/// Allocates task keys of the form `T-E{NN}-F{NN}-{NNN}`.
#[derive(Clone)]
pub struct KeyGenerator {
    db: Database,
}

impl KeyGenerator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Next free key for a feature. `feature_key` may be short (`F02`).
    ///
    /// Reads outside any transaction, so the key may be taken by the time
    /// it is inserted; creation uses [`next_task_key_in`] instead.
    pub fn generate_task_key(&self, epic_key: &str, feature_key: &str) -> PlanResult<String> {
        self.db
            .with_conn(|conn| next_task_key_in(conn, epic_key, feature_key))
    }
}

/// Allocate the next key using an open connection or transaction.
///
/// Inside a `BEGIN IMMEDIATE` transaction the read and the following insert
/// form one unit; the unique index on `tasks.key` remains the backstop.
pub fn next_task_key_in(conn: &Connection, epic_key: &str, feature_key: &str) -> PlanResult<String> {
    let canonical = keys::normalize_feature_key(epic_key, feature_key);
    let feature = get_feature_by_key(conn, &canonical)?
        .ok_or_else(|| PlanError::not_found(Entity::Feature, &canonical))?;

    let max = max_task_number(conn, &feature.key)?;
    let next = max + 1;
    if next > MAX_TASK_NUMBER {
        return Err(PlanError::KeySpaceExhausted(feature.key));
    }

    // The stored feature key carries its own epic prefix.
    let owning_epic = feature.key.split_once('-').map_or(epic_key, |(epic, _)| epic);
    let key = keys::format_task_key(owning_epic, &feature.key, next);
    debug!(feature = %feature.key, max, key = %key, "Allocated task key");
    Ok(key)
}
