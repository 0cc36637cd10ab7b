//! Epic persistence.

use super::{Database, now_utc};
use crate::error::{Entity, PlanError, PlanResult};
use crate::keys;
use crate::types::{Epic, NewEpic};
use rusqlite::{Connection, OptionalExtension, Row, params};

const EPIC_COLUMNS: &str =
    "id, key, title, slug, file_path, custom_folder_path, created_at, updated_at";

pub fn parse_epic_row(row: &Row) -> rusqlite::Result<Epic> {
    Ok(Epic {
        id: row.get("id")?,
        key: row.get("key")?,
        title: row.get("title")?,
        slug: row.get("slug")?,
        file_path: row.get("file_path")?,
        custom_folder_path: row.get("custom_folder_path")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_epic_by_key(conn: &Connection, key: &str) -> PlanResult<Option<Epic>> {
    let epic = conn
        .query_row(
            &format!("SELECT {EPIC_COLUMNS} FROM epics WHERE key = ?1"),
            params![keys::normalize(key)],
            parse_epic_row,
        )
        .optional()?;
    Ok(epic)
}

pub fn get_epic_by_id(conn: &Connection, id: i64) -> PlanResult<Option<Epic>> {
    let epic = conn
        .query_row(
            &format!("SELECT {EPIC_COLUMNS} FROM epics WHERE id = ?1"),
            params![id],
            parse_epic_row,
        )
        .optional()?;
    Ok(epic)
}

impl Database {
    /// Create an epic. The key must have the `E{NN}` shape.
    pub fn create_epic(&self, input: &NewEpic) -> PlanResult<Epic> {
        let key = keys::normalize(&input.key);
        if !keys::is_epic_key(&key) {
            return Err(PlanError::invalid(
                "epic key",
                format!("'{}' must look like E01", input.key),
            ));
        }
        if input.title.trim().is_empty() {
            return Err(PlanError::invalid("title", "title cannot be empty"));
        }

        self.with_conn(|conn| {
            if get_epic_by_key(conn, &key)?.is_some() {
                return Err(PlanError::KeyInUse {
                    entity: Entity::Epic,
                    key: key.clone(),
                });
            }

            let now = now_utc();
            conn.execute(
                "INSERT INTO epics (key, title, slug, file_path, custom_folder_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    key,
                    input.title.trim(),
                    input.slug,
                    input.file_path,
                    input.custom_folder_path,
                    now,
                ],
            )?;

            Ok(Epic {
                id: conn.last_insert_rowid(),
                key: key.clone(),
                title: input.title.trim().to_string(),
                slug: input.slug.clone(),
                file_path: input.file_path.clone(),
                custom_folder_path: input.custom_folder_path.clone(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    pub fn get_epic(&self, key: &str) -> PlanResult<Option<Epic>> {
        self.with_conn(|conn| get_epic_by_key(conn, key))
    }

    pub fn get_epic_by_id(&self, id: i64) -> PlanResult<Option<Epic>> {
        self.with_conn(|conn| get_epic_by_id(conn, id))
    }

    /// All epics ordered by key.
    pub fn list_epics(&self) -> PlanResult<Vec<Epic>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {EPIC_COLUMNS} FROM epics ORDER BY key"))?;
            let epics = stmt
                .query_map([], parse_epic_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(epics)
        })
    }

    /// Set or clear the explicit markdown path of an epic.
    pub fn set_epic_file_path(&self, key: &str, file_path: Option<&str>) -> PlanResult<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE epics SET file_path = ?1, updated_at = ?2 WHERE key = ?3",
                params![file_path, now_utc(), keys::normalize(key)],
            )?;
            if updated == 0 {
                return Err(PlanError::not_found(Entity::Epic, key));
            }
            Ok(())
        })
    }
}
