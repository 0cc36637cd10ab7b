//! Feature persistence.

use super::epics::get_epic_by_key;
use super::{Database, now_utc};
use crate::error::{Entity, PlanError, PlanResult};
use crate::keys;
use crate::types::{Feature, NewFeature};
use rusqlite::{Connection, OptionalExtension, Row, params};

const FEATURE_COLUMNS: &str =
    "id, epic_id, key, title, slug, file_path, custom_folder_path, created_at, updated_at";

pub fn parse_feature_row(row: &Row) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get("id")?,
        epic_id: row.get("epic_id")?,
        key: row.get("key")?,
        title: row.get("title")?,
        slug: row.get("slug")?,
        file_path: row.get("file_path")?,
        custom_folder_path: row.get("custom_folder_path")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Look up a feature by its full `E{NN}-F{NN}` key.
pub fn get_feature_by_key(conn: &Connection, key: &str) -> PlanResult<Option<Feature>> {
    let feature = conn
        .query_row(
            &format!("SELECT {FEATURE_COLUMNS} FROM features WHERE key = ?1"),
            params![keys::normalize(key)],
            parse_feature_row,
        )
        .optional()?;
    Ok(feature)
}

pub fn get_feature_by_id(conn: &Connection, id: i64) -> PlanResult<Option<Feature>> {
    let feature = conn
        .query_row(
            &format!("SELECT {FEATURE_COLUMNS} FROM features WHERE id = ?1"),
            params![id],
            parse_feature_row,
        )
        .optional()?;
    Ok(feature)
}

impl Database {
    /// Create a feature under an existing epic.
    pub fn create_feature(&self, input: &NewFeature) -> PlanResult<Feature> {
        let key = keys::normalize_feature_key(&input.epic_key, &input.key);
        if !keys::is_feature_key(&key) {
            return Err(PlanError::invalid(
                "feature key",
                format!("'{}' must look like F01 or E01-F01", input.key),
            ));
        }
        if input.title.trim().is_empty() {
            return Err(PlanError::invalid("title", "title cannot be empty"));
        }

        self.with_conn(|conn| {
            let epic = get_epic_by_key(conn, &input.epic_key)?
                .ok_or_else(|| PlanError::not_found(Entity::Epic, &input.epic_key))?;
            if !key.starts_with(&format!("{}-", epic.key)) {
                return Err(PlanError::FeatureEpicMismatch {
                    feature: key.clone(),
                    epic: epic.key,
                });
            }
            if get_feature_by_key(conn, &key)?.is_some() {
                return Err(PlanError::KeyInUse {
                    entity: Entity::Feature,
                    key: key.clone(),
                });
            }

            let now = now_utc();
            conn.execute(
                "INSERT INTO features (epic_id, key, title, slug, file_path, custom_folder_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    epic.id,
                    key,
                    input.title.trim(),
                    input.slug,
                    input.file_path,
                    input.custom_folder_path,
                    now,
                ],
            )?;

            Ok(Feature {
                id: conn.last_insert_rowid(),
                epic_id: epic.id,
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

    pub fn get_feature(&self, key: &str) -> PlanResult<Option<Feature>> {
        self.with_conn(|conn| get_feature_by_key(conn, key))
    }

    pub fn get_feature_by_id(&self, id: i64) -> PlanResult<Option<Feature>> {
        self.with_conn(|conn| get_feature_by_id(conn, id))
    }

    /// Features of one epic ordered by key.
    pub fn list_features(&self, epic_id: i64) -> PlanResult<Vec<Feature>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FEATURE_COLUMNS} FROM features WHERE epic_id = ?1 ORDER BY key"
            ))?;
            let features = stmt
                .query_map(params![epic_id], parse_feature_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(features)
        })
    }

    /// Set or clear the explicit markdown path of a feature.
    pub fn set_feature_file_path(&self, key: &str, file_path: Option<&str>) -> PlanResult<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE features SET file_path = ?1, updated_at = ?2 WHERE key = ?3",
                params![file_path, now_utc(), keys::normalize(key)],
            )?;
            if updated == 0 {
                return Err(PlanError::not_found(Entity::Feature, key));
            }
            Ok(())
        })
    }
}
