//! Cross-store integrity scan.
//!
//! Creation keeps rows and files consistent through transaction rollback and
//! compensating deletion, but a crash between the file write and the
//! rollback can still leave a stray file. The scan reports such drift
//! without repairing it.

use super::Database;
use crate::error::{PlanError, PlanResult};
use crate::paths::{DEFAULT_PLAN_ROOT, TASKS_DIR, feature_base_dir};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A task whose recorded file is missing on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenFilePath {
    pub task_key: String,
    pub file_path: String,
}

/// Drift between the task table and the markdown tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub tasks_checked: usize,
    /// Tasks pointing at a file that does not exist.
    pub broken_file_paths: Vec<BrokenFilePath>,
    /// Tasks with no file claim (for example after a forced reassignment).
    pub unlinked_tasks: Vec<String>,
    /// Task markdown files under the plan tree claimed by no task.
    pub orphaned_files: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.broken_file_paths.is_empty()
            && self.unlinked_tasks.is_empty()
            && self.orphaned_files.is_empty()
    }
}

impl Database {
    /// Compare task file claims against the files under `project_root`.
    pub fn check_integrity(&self, project_root: &Path) -> PlanResult<IntegrityReport> {
        let tasks = self.list_tasks()?;
        let mut report = IntegrityReport {
            tasks_checked: tasks.len(),
            ..Default::default()
        };

        let mut claimed: BTreeSet<String> = BTreeSet::new();
        for task in &tasks {
            match &task.file_path {
                Some(path) => {
                    if !project_root.join(path).is_file() {
                        report.broken_file_paths.push(BrokenFilePath {
                            task_key: task.key.clone(),
                            file_path: path.clone(),
                        });
                    }
                    claimed.insert(normalize_separators(path));
                }
                None => report.unlinked_tasks.push(task.key.clone()),
            }
        }

        let mut files = BTreeSet::new();
        for scan_root in self.scan_roots()? {
            let dir = project_root.join(&scan_root);
            if dir.is_dir() {
                collect_task_files(&dir, &mut files)?;
            }
        }
        for file in files {
            let Ok(relative) = file.strip_prefix(project_root) else {
                continue;
            };
            let relative = normalize_separators(&relative.to_string_lossy());
            if !claimed.contains(&relative) {
                report.orphaned_files.push(relative);
            }
        }
        report.orphaned_files.sort();

        debug!(
            tasks = report.tasks_checked,
            broken = report.broken_file_paths.len(),
            unlinked = report.unlinked_tasks.len(),
            orphaned = report.orphaned_files.len(),
            "Integrity scan finished"
        );
        Ok(report)
    }
}

impl Database {
    /// Directories that can hold task files: the default plan tree, every
    /// custom epic folder, and the `tasks/` directory of every feature.
    fn scan_roots(&self) -> PlanResult<BTreeSet<String>> {
        let mut roots = BTreeSet::from([DEFAULT_PLAN_ROOT.to_string()]);
        for epic in self.list_epics()? {
            if let Some(folder) = epic.custom_folder_path.as_deref().filter(|f| !f.is_empty()) {
                roots.insert(folder.trim_end_matches('/').to_string());
            }
            for feature in self.list_features(epic.id)? {
                let base = feature_base_dir(&epic, &feature);
                let tasks_dir = if base.is_empty() {
                    TASKS_DIR.to_string()
                } else {
                    format!("{base}/{TASKS_DIR}")
                };
                roots.insert(tasks_dir);
            }
        }
        Ok(roots)
    }
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Collect `*.md` files that live directly inside a `tasks/` directory.
fn collect_task_files(dir: &Path, out: &mut BTreeSet<PathBuf>) -> PlanResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| PlanError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PlanError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_task_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md")
            && dir.file_name().is_some_and(|name| name == TASKS_DIR)
        {
            out.insert(path);
        }
    }
    Ok(())
}
