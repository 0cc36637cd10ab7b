//! Markdown path resolution and custom path validation.
//!
//! Resolution is pure string manipulation over stored metadata (no
//! filesystem I/O). Precedence, highest first:
//! 1. Explicit `file_path` stored on the entity
//! 2. A custom folder on the entity (epics and features)
//! 3. A custom folder inherited from the parent epic (features and tasks)
//! 4. The default layout `docs/plan/{epic}-{slug}/{feature}-{slug}/`
//!
//! Tasks live at `{feature base dir}/tasks/{task-key}.md`. A missing slug
//! falls back to the entity key, so every well-formed entity resolves.
//!
//! Relative paths are kept with forward slashes, which is how they are
//! stored in the database.

use crate::db::Database;
use crate::db::epics::get_epic_by_id;
use crate::db::features::get_feature_by_id;
use crate::error::{Entity, PathViolation, PlanError, PlanResult};
use crate::types::{Epic, Feature, Task};
use std::path::{Component, Path, PathBuf};

/// Root of the default plan tree, relative to the project root.
pub const DEFAULT_PLAN_ROOT: &str = "docs/plan";

const EPIC_FILE_NAME: &str = "epic.md";
const FEATURE_FILE_NAME: &str = "prd.md";
/// Directory holding a feature's task files.
pub const TASKS_DIR: &str = "tasks";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn folder_name(key: &str, slug: &Option<String>) -> String {
    format!("{}-{}", key, non_empty(slug).unwrap_or(key))
}

fn join_rel(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_end_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// `docs/plan/{epic-key}-{epic-slug}`.
pub fn default_epic_dir(epic: &Epic) -> String {
    join_rel(&[DEFAULT_PLAN_ROOT, &folder_name(&epic.key, &epic.slug)])
}

/// Project-relative markdown path of an epic.
pub fn epic_relative_path(epic: &Epic) -> String {
    if let Some(path) = non_empty(&epic.file_path) {
        return path.to_string();
    }
    if let Some(folder) = non_empty(&epic.custom_folder_path) {
        return join_rel(&[folder, EPIC_FILE_NAME]);
    }
    join_rel(&[&default_epic_dir(epic), EPIC_FILE_NAME])
}

/// Project-relative markdown path of a feature.
pub fn feature_relative_path(epic: &Epic, feature: &Feature) -> String {
    if let Some(path) = non_empty(&feature.file_path) {
        return path.to_string();
    }
    if let Some(folder) = non_empty(&feature.custom_folder_path) {
        return join_rel(&[folder, FEATURE_FILE_NAME]);
    }
    join_rel(&[&folder_base_dir(epic, feature), FEATURE_FILE_NAME])
}

// Feature directory ignoring the feature's own file_path.
fn folder_base_dir(epic: &Epic, feature: &Feature) -> String {
    if let Some(folder) = non_empty(&feature.custom_folder_path) {
        return folder.trim_end_matches('/').to_string();
    }
    let feature_folder = folder_name(&feature.key, &feature.slug);
    match non_empty(&epic.custom_folder_path) {
        Some(epic_folder) => join_rel(&[epic_folder, &feature_folder]),
        None => join_rel(&[&default_epic_dir(epic), &feature_folder]),
    }
}

/// Directory that holds a feature's `tasks/` folder.
///
/// When the feature has an explicit file, its directory wins so tasks stay
/// next to wherever the feature document actually lives.
pub fn feature_base_dir(epic: &Epic, feature: &Feature) -> String {
    if let Some(path) = non_empty(&feature.file_path) {
        let parent = Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        return parent;
    }
    folder_base_dir(epic, feature)
}

/// Default project-relative path for a task key under a feature.
pub fn default_task_relative_path(epic: &Epic, feature: &Feature, task_key: &str) -> String {
    join_rel(&[
        &feature_base_dir(epic, feature),
        TASKS_DIR,
        &format!("{task_key}.md"),
    ])
}

/// Resolves absolute markdown paths from database metadata.
#[derive(Clone)]
pub struct PathResolver {
    db: Database,
    project_root: PathBuf,
}

impl PathResolver {
    pub fn new(db: Database, project_root: impl Into<PathBuf>) -> Self {
        Self {
            db,
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Join a stored relative path onto the project root.
    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.project_root.join(relative)
    }

    pub fn resolve_epic_path(&self, epic_key: &str) -> PlanResult<PathBuf> {
        let epic = self
            .db
            .get_epic(epic_key)?
            .ok_or_else(|| PlanError::not_found(Entity::Epic, epic_key))?;
        Ok(self.absolute(&epic_relative_path(&epic)))
    }

    pub fn resolve_feature_path(&self, feature_key: &str) -> PlanResult<PathBuf> {
        let feature = self
            .db
            .get_feature(feature_key)?
            .ok_or_else(|| PlanError::not_found(Entity::Feature, feature_key))?;
        let epic = self.parent_epic(&feature)?;
        Ok(self.absolute(&feature_relative_path(&epic, &feature)))
    }

    pub fn resolve_task_path(&self, task_key: &str) -> PlanResult<PathBuf> {
        let task = self.db.require_task(task_key)?;
        if let Some(path) = non_empty(&task.file_path) {
            return Ok(self.absolute(path));
        }
        let (epic, feature) = self.ancestors(&task)?;
        Ok(self.absolute(&default_task_relative_path(&epic, &feature, &task.key)))
    }

    fn parent_epic(&self, feature: &Feature) -> PlanResult<Epic> {
        self.db.with_conn(|conn| {
            get_epic_by_id(conn, feature.epic_id)?
                .ok_or_else(|| PlanError::not_found(Entity::Epic, format!("#{}", feature.epic_id)))
        })
    }

    fn ancestors(&self, task: &Task) -> PlanResult<(Epic, Feature)> {
        let feature = self.db.with_conn(|conn| {
            get_feature_by_id(conn, task.feature_id)?.ok_or_else(|| {
                PlanError::not_found(Entity::Feature, format!("#{}", task.feature_id))
            })
        })?;
        let epic = self.parent_epic(&feature)?;
        Ok((epic, feature))
    }
}

fn is_absolute_like(raw: &str) -> bool {
    Path::new(raw).is_absolute() || raw.starts_with('/') || raw.starts_with('\\')
}

fn has_parent_segment(raw: &str) -> bool {
    raw.split(['/', '\\']).any(|segment| segment == "..")
}

/// Drop `.` components and rejoin with forward slashes.
fn normalize_relative(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    Path::new(&unified)
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Validate a caller-supplied markdown filename.
///
/// Returns `(absolute, relative)` where `relative` is normalized and
/// `project_root.join(relative) == absolute`. The path does not need to
/// exist; nothing is canonicalized.
pub fn validate_custom_filename(filename: &str, project_root: &Path) -> PlanResult<(PathBuf, String)> {
    let relative = validate_relative(filename, project_root)?;
    let name = relative.rsplit('/').next().unwrap_or_default();
    if name.eq_ignore_ascii_case(".md") {
        // Extension only, no file name.
        return Err(PlanError::unsafe_path(filename, PathViolation::Empty));
    }
    if Path::new(&relative).extension().is_none_or(|ext| ext != "md") {
        return Err(PlanError::unsafe_path(filename, PathViolation::Extension));
    }
    Ok((project_root.join(&relative), relative))
}

/// Validate a caller-supplied folder (for custom epic and feature folders).
pub fn validate_folder_path(folder: &str, project_root: &Path) -> PlanResult<String> {
    validate_relative(folder, project_root)
}

fn validate_relative(raw: &str, project_root: &Path) -> PlanResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PlanError::unsafe_path(raw, PathViolation::Empty));
    }
    if is_absolute_like(trimmed) {
        return Err(PlanError::unsafe_path(raw, PathViolation::Absolute));
    }
    if has_parent_segment(trimmed) {
        return Err(PlanError::unsafe_path(raw, PathViolation::Traversal));
    }

    let relative = normalize_relative(trimmed);
    if relative.is_empty() {
        return Err(PlanError::unsafe_path(raw, PathViolation::Empty));
    }

    let absolute = project_root.join(&relative);
    if !absolute.starts_with(project_root) {
        return Err(PlanError::unsafe_path(raw, PathViolation::OutsideProject));
    }
    Ok(relative)
}
