//! Side-effect-free validation of task creation input.
//!
//! Checks run in a fixed order and the first failure wins:
//! epic, feature (and its parent), agent type, priority, title, dependencies.

use crate::db::Database;
use crate::db::epics::get_epic_by_key;
use crate::db::features::get_feature_by_key;
use crate::db::tasks::task_key_exists;
use crate::error::{Entity, PlanError, PlanResult};
use crate::keys;
use crate::types::{CreateTaskInput, PRIORITY_MAX, PRIORITY_MIN, ValidatedTaskData};
use rusqlite::Connection;

/// Validates creation input against the store without writing.
#[derive(Clone)]
pub struct Validator {
    db: Database,
    default_agent_type: String,
}

impl Validator {
    pub fn new(db: Database, default_agent_type: impl Into<String>) -> Self {
        Self {
            db,
            default_agent_type: default_agent_type.into(),
        }
    }

    pub fn validate_task_input(&self, input: &CreateTaskInput) -> PlanResult<ValidatedTaskData> {
        self.db
            .with_conn(|conn| validate_task_input_in(conn, input, &self.default_agent_type))
    }
}

/// Validate `input` using an open connection.
pub fn validate_task_input_in(
    conn: &Connection,
    input: &CreateTaskInput,
    default_agent_type: &str,
) -> PlanResult<ValidatedTaskData> {
    let epic = get_epic_by_key(conn, &input.epic_key)?
        .ok_or_else(|| PlanError::not_found(Entity::Epic, keys::normalize(&input.epic_key)))?;

    let feature_key = keys::normalize_feature_key(&epic.key, &input.feature_key);
    let feature = get_feature_by_key(conn, &feature_key)?
        .ok_or_else(|| PlanError::not_found(Entity::Feature, &feature_key))?;
    if feature.epic_id != epic.id {
        return Err(PlanError::FeatureEpicMismatch {
            feature: feature.key,
            epic: epic.key,
        });
    }

    let agent_type = validate_agent_type(input.agent_type.as_deref(), default_agent_type)?;
    validate_priority(input.priority)?;
    validate_title(&input.title)?;
    let dependencies = validate_dependencies(conn, input.depends_on.as_deref())?;

    Ok(ValidatedTaskData {
        epic_id: epic.id,
        epic_key: epic.key,
        feature_id: feature.id,
        feature_key: feature.key,
        agent_type,
        dependencies,
    })
}

/// Any non-blank agent type is accepted; `None` takes the default.
pub fn validate_agent_type(agent_type: Option<&str>, default: &str) -> PlanResult<String> {
    match agent_type {
        None => Ok(default.to_string()),
        Some(value) if value.trim().is_empty() => Err(PlanError::invalid(
            "agent type",
            "agent type cannot be empty",
        )),
        Some(value) => Ok(value.trim().to_string()),
    }
}

pub fn validate_priority(priority: i32) -> PlanResult<()> {
    if (PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        Ok(())
    } else {
        Err(PlanError::invalid(
            "priority",
            format!("must be between {PRIORITY_MIN} and {PRIORITY_MAX}, got {priority}"),
        ))
    }
}

pub fn validate_title(title: &str) -> PlanResult<()> {
    if title.trim().is_empty() {
        Err(PlanError::invalid("title", "title cannot be empty"))
    } else {
        Ok(())
    }
}

/// Split, trim and resolve a comma-separated dependency list.
fn validate_dependencies(conn: &Connection, raw: Option<&str>) -> PlanResult<Vec<String>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut dependencies = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let key = keys::normalize(entry);
        if !keys::is_task_key(&key) {
            return Err(PlanError::invalid(
                "dependency",
                format!("'{entry}' is not a task key (expected T-E01-F01-001)"),
            ));
        }
        if !task_key_exists(conn, &key)? {
            return Err(PlanError::not_found(Entity::Dependency, key));
        }
        dependencies.push(key);
    }
    Ok(dependencies)
}
