//! Atomic task creation.
//!
//! One call validates the input, allocates a key, resolves the markdown
//! path, settles file claims, inserts the task and its first history row,
//! renders the file and commits. Any failure before commit rolls back the
//! transaction and removes whatever this call put on disk; the only
//! cross-store gap left is a crash between the file write and the
//! rollback, which [`Database::check_integrity`] reports.

use crate::config::{Config, WorkflowConfig};
use crate::db::epics::get_epic_by_id;
use crate::db::features::get_feature_by_id;
use crate::db::history::insert_history;
use crate::db::tasks::{clear_task_file_path, find_task_by_file_path, insert_task, task_key_exists};
use crate::db::{Database, now_utc};
use crate::error::{CreateStage, Entity, PlanError, PlanResult};
use crate::keygen::next_task_key_in;
use crate::keys;
use crate::paths::{self, default_task_relative_path, validate_custom_filename};
use crate::render::{Renderer, TemplateData, TemplateRenderer};
use crate::types::{
    CreateTaskInput, CreatedTask, Epic, Feature, NewEpic, NewFeature, NewHistory, NewTask,
    ValidatedTaskData,
};
use crate::validator::validate_task_input_in;
use crate::workflow::{agent_identifier, initial_status};
use heck::ToKebabCase;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Attempts for an auto-allocated key that loses a race on the unique index.
const MAX_KEY_ATTEMPTS: u32 = 3;

/// Observer polled at fixed points of a creation.
///
/// Returning an error aborts the creation through the normal rollback path.
pub trait Cancellation {
    fn checkpoint(&self, stage: CreateStage) -> PlanResult<()>;
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn checkpoint(&self, _stage: CreateStage) -> PlanResult<()> {
        Ok(())
    }
}

/// Cancels once a point in time has passed.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn at(at: Instant) -> Self {
        Self { at }
    }
}

impl Cancellation for Deadline {
    fn checkpoint(&self, stage: CreateStage) -> PlanResult<()> {
        if Instant::now() >= self.at {
            Err(PlanError::Cancelled(stage))
        } else {
            Ok(())
        }
    }
}

/// Undoes filesystem effects of a creation unless disarmed.
///
/// Tracks the file written and each directory created by this call.
/// On drop, the file is removed and the directories are removed deepest
/// first, each only if it is empty.
#[derive(Debug)]
struct FsRollback {
    file: Option<PathBuf>,
    created_dirs: Vec<PathBuf>,
    armed: bool,
}

impl FsRollback {
    fn new() -> Self {
        Self {
            file: None,
            created_dirs: Vec::new(),
            armed: true,
        }
    }

    /// Create `dir` and any missing ancestors, remembering which were new.
    fn create_dir_all(&mut self, dir: &Path) -> PlanResult<()> {
        let missing: Vec<&Path> = dir.ancestors().take_while(|p| !p.exists()).collect();
        for path in missing.into_iter().rev() {
            match fs::create_dir(path) {
                Ok(()) => self.created_dirs.push(path.to_path_buf()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(PlanError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Write `content` to a file that must not exist yet.
    fn write_new_file(&mut self, path: &Path, content: &str) -> PlanResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| PlanError::io(path, e))?;
        self.file = Some(path.to_path_buf());
        file.write_all(content.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| PlanError::io(path, e))
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for FsRollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(file) = self.file.take() {
            match fs::remove_file(&file) {
                Ok(()) => debug!(path = %file.display(), "Removed task file after failed creation"),
                Err(e) => warn!(path = %file.display(), error = %e, "Failed to remove task file after failed creation"),
            }
        }
        for dir in self.created_dirs.iter().rev() {
            // Fails harmlessly when something else now lives in the directory.
            let _ = fs::remove_dir(dir);
        }
    }
}

/// Orchestrates creation of plan entities.
pub struct Creator<R = TemplateRenderer> {
    db: Database,
    workflow: WorkflowConfig,
    renderer: R,
    project_root: PathBuf,
    default_agent_type: String,
}

impl Creator<TemplateRenderer> {
    /// Creator wired from project configuration.
    pub fn from_config(
        db: Database,
        config: &Config,
        workflow: WorkflowConfig,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        let project_root = project_root.into();
        let renderer = TemplateRenderer::new(config.template_dir(&project_root));
        Self::new(db, workflow, renderer, project_root)
            .with_default_agent_type(config.agent.default_type.clone())
    }
}

impl<R: Renderer> Creator<R> {
    pub fn new(
        db: Database,
        workflow: WorkflowConfig,
        renderer: R,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            workflow,
            renderer,
            project_root: project_root.into(),
            default_agent_type: crate::types::DEFAULT_AGENT_TYPE.to_string(),
        }
    }

    pub fn with_default_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.default_agent_type = agent_type.into();
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Create a task.
    pub fn create_task(&self, input: &CreateTaskInput) -> PlanResult<CreatedTask> {
        self.create_task_with(input, &NeverCancel)
    }

    /// Create a task, polling `cancel` at each [`CreateStage`].
    pub fn create_task_with(
        &self,
        input: &CreateTaskInput,
        cancel: &dyn Cancellation,
    ) -> PlanResult<CreatedTask> {
        let validated = self
            .db
            .with_conn(|conn| validate_task_input_in(conn, input, &self.default_agent_type))?;

        let custom_key = input
            .custom_key
            .as_deref()
            .map(validate_custom_key)
            .transpose()?;
        let custom_path = input
            .filename
            .as_deref()
            .map(|f| validate_custom_filename(f, &self.project_root))
            .transpose()?;

        if let Some(key) = &custom_key {
            if self.db.task_exists(key)? {
                return Err(PlanError::KeyInUse {
                    entity: Entity::Task,
                    key: key.clone(),
                });
            }
        }

        cancel.checkpoint(CreateStage::BeforeWrite)?;

        let attempts = if custom_key.is_some() { 1 } else { MAX_KEY_ATTEMPTS };
        let mut attempt = 1;
        loop {
            let mut allocated = None;
            let result = self.try_create(
                input,
                &validated,
                custom_key.as_deref(),
                custom_path.as_ref(),
                cancel,
                &mut allocated,
            );
            match result {
                Err(e) if e.is_unique_violation() && attempt < attempts => {
                    warn!(
                        feature = %validated.feature_key,
                        attempt,
                        error = %e,
                        "Task key allocation raced with another writer, retrying"
                    );
                    attempt += 1;
                }
                Err(e) if e.is_unique_violation() => {
                    warn!(
                        feature = %validated.feature_key,
                        attempts = attempt,
                        error = %e,
                        "Giving up on task key allocation"
                    );
                    return Err(PlanError::KeyInUse {
                        entity: Entity::Task,
                        key: allocated.unwrap_or_else(|| validated.feature_key.clone()),
                    });
                }
                other => return other,
            }
        }
    }

    fn try_create(
        &self,
        input: &CreateTaskInput,
        validated: &ValidatedTaskData,
        custom_key: Option<&str>,
        custom_path: Option<&(PathBuf, String)>,
        cancel: &dyn Cancellation,
        allocated: &mut Option<String>,
    ) -> PlanResult<CreatedTask> {
        let mut rollback = FsRollback::new();

        let created = self.db.with_immediate_tx(|tx| {
            let key = match custom_key {
                Some(key) => {
                    if task_key_exists(&tx, key)? {
                        return Err(PlanError::KeyInUse {
                            entity: Entity::Task,
                            key: key.to_string(),
                        });
                    }
                    key.to_string()
                }
                None => next_task_key_in(&tx, &validated.epic_key, &validated.feature_key)?,
            };
            *allocated = Some(key.clone());

            let (absolute, relative) = match custom_path {
                Some((absolute, relative)) => (absolute.clone(), relative.clone()),
                None => {
                    let (epic, feature) = load_ancestors(&tx, validated)?;
                    let relative = default_task_relative_path(&epic, &feature, &key);
                    (self.project_root.join(&relative), relative)
                }
            };

            let mut reassigned_from = None;
            if let Some(claimant) = find_task_by_file_path(&tx, &relative)? {
                if !input.force {
                    return Err(PlanError::FileClaimed {
                        path: relative,
                        claimant: claimant.key,
                        title: claimant.title,
                    });
                }
                warn!(
                    path = %relative,
                    from = %claimant.key,
                    to = %key,
                    "Reassigning file claim"
                );
                clear_task_file_path(&tx, claimant.id)?;
                reassigned_from = Some(claimant.key);
            }

            if let Some(parent) = absolute.parent() {
                rollback.create_dir_all(parent)?;
            }

            let now = now_utc();
            let status = initial_status(Some(&self.workflow));
            let task = insert_task(
                &tx,
                &NewTask {
                    feature_id: validated.feature_id,
                    key: key.clone(),
                    title: input.title.trim().to_string(),
                    description: input
                        .description
                        .as_deref()
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(String::from),
                    status: status.clone(),
                    agent_type: validated.agent_type.clone(),
                    priority: input.priority,
                    depends_on: validated.dependencies.clone(),
                    file_path: Some(relative.clone()),
                    execution_order: input.execution_order,
                    created_at: now,
                },
            )?;
            insert_history(
                &tx,
                &NewHistory {
                    task_id: task.id,
                    old_status: None,
                    new_status: status.clone(),
                    agent: Some(agent_identifier()),
                    notes: Some("Task created".to_string()),
                    forced: false,
                    timestamp: now,
                },
            )?;

            cancel.checkpoint(CreateStage::AfterInsert)?;

            let data = TemplateData {
                key: task.key.clone(),
                title: task.title.clone(),
                description: task.description.clone().unwrap_or_default(),
                epic: validated.epic_key.clone(),
                feature: validated.feature_key.clone(),
                agent_type: task.agent_type.clone(),
                priority: task.priority,
                status: task.status.clone(),
                depends_on: task.depends_on.clone(),
                created_at: now.to_rfc3339(),
                created_date: now.format("%Y-%m-%d").to_string(),
            };
            let body = self
                .renderer
                .render(&task.agent_type, input.template.as_deref(), &data)?;

            let file_written = if absolute.exists() {
                debug!(path = %absolute.display(), "Task file already exists, linking without writing");
                false
            } else {
                rollback.write_new_file(&absolute, &body)?;
                true
            };

            cancel.checkpoint(CreateStage::AfterFileWrite)?;

            tx.commit()?;

            Ok(CreatedTask {
                task,
                file_path: absolute,
                file_written,
                reassigned_from,
            })
        })?;

        rollback.disarm();
        info!(
            task_key = %created.task.key,
            path = %created.file_path.display(),
            status = %created.task.status,
            "Created task"
        );
        Ok(created)
    }

    /// Create an epic, deriving the slug from the title when none is given.
    pub fn create_epic(&self, input: &NewEpic) -> PlanResult<Epic> {
        let mut input = input.clone();
        input.slug = Some(slug_or_title(input.slug.as_deref(), &input.title));
        input.file_path = self.checked_file(input.file_path.as_deref())?;
        input.custom_folder_path = self.checked_folder(input.custom_folder_path.as_deref())?;

        let epic = self.db.create_epic(&input)?;
        info!(epic = %epic.key, slug = ?epic.slug, "Created epic");
        Ok(epic)
    }

    /// Create a feature, deriving the slug from the title when none is given.
    pub fn create_feature(&self, input: &NewFeature) -> PlanResult<Feature> {
        let mut input = input.clone();
        input.slug = Some(slug_or_title(input.slug.as_deref(), &input.title));
        input.file_path = self.checked_file(input.file_path.as_deref())?;
        input.custom_folder_path = self.checked_folder(input.custom_folder_path.as_deref())?;

        let feature = self.db.create_feature(&input)?;
        info!(feature = %feature.key, slug = ?feature.slug, "Created feature");
        Ok(feature)
    }

    fn checked_file(&self, file: Option<&str>) -> PlanResult<Option<String>> {
        file.map(|f| validate_custom_filename(f, &self.project_root).map(|(_, rel)| rel))
            .transpose()
    }

    fn checked_folder(&self, folder: Option<&str>) -> PlanResult<Option<String>> {
        folder
            .map(|f| paths::validate_folder_path(f, &self.project_root))
            .transpose()
    }
}

fn load_ancestors(
    conn: &rusqlite::Connection,
    validated: &ValidatedTaskData,
) -> PlanResult<(Epic, Feature)> {
    let feature = get_feature_by_id(conn, validated.feature_id)?
        .ok_or_else(|| PlanError::not_found(Entity::Feature, &validated.feature_key))?;
    let epic = get_epic_by_id(conn, validated.epic_id)?
        .ok_or_else(|| PlanError::not_found(Entity::Epic, &validated.epic_key))?;
    Ok((epic, feature))
}

/// Custom keys become file names, so only plain characters are allowed.
fn validate_custom_key(raw: &str) -> PlanResult<String> {
    let key = keys::normalize(raw);
    if key.is_empty() {
        return Err(PlanError::invalid("task key", "custom key cannot be empty"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PlanError::invalid(
            "task key",
            format!("'{raw}' may only contain letters, digits, '-' and '_'"),
        ));
    }
    Ok(key)
}

fn slug_or_title(slug: Option<&str>, title: &str) -> String {
    match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slug.to_kebab_case(),
        None => title.to_kebab_case(),
    }
}
