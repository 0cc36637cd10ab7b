//! Project settings read from `.taskplan.json`.

use crate::error::{PlanError, PlanResult};
use crate::types::DEFAULT_AGENT_TYPE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the project config dotfile, relative to the project root.
pub const CONFIG_FILE_NAME: &str = ".taskplan.json";

/// Project configuration.
///
/// The same file also carries the workflow section, which is parsed
/// separately by [`super::WorkflowConfig`]; unknown keys are ignored here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub templates: TemplatesConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, relative paths resolve against the project root.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskplan/tasks.db")
}

/// Template overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Directory holding `task-{agent}.md` overrides.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent type used when a task is created without one.
    #[serde(default = "default_agent_type")]
    pub default_type: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_type: default_agent_type(),
        }
    }
}

fn default_agent_type() -> String {
    DEFAULT_AGENT_TYPE.to_string()
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PlanError::io(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration for a project root or return defaults.
    ///
    /// `TASKPLAN_CONFIG_PATH` wins over `{root}/.taskplan.json`. Environment
    /// overrides are applied last.
    pub fn load_or_default(project_root: &Path) -> Self {
        let path = config_path(project_root);

        let mut config = if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded project config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable config, using defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    /// Apply `TASKPLAN_DB_PATH` and `TASKPLAN_TEMPLATE_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(db_path) = std::env::var("TASKPLAN_DB_PATH") {
            self.database.path = PathBuf::from(db_path);
        }
        if let Ok(dir) = std::env::var("TASKPLAN_TEMPLATE_DIR") {
            self.templates.dir = Some(PathBuf::from(dir));
        }
    }

    /// Absolute database path for a project root.
    pub fn db_path(&self, project_root: &Path) -> PathBuf {
        resolve_against(project_root, &self.database.path)
    }

    /// Absolute template directory, if configured.
    pub fn template_dir(&self, project_root: &Path) -> Option<PathBuf> {
        self.templates
            .dir
            .as_ref()
            .map(|dir| resolve_against(project_root, dir))
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self, project_root: &Path) -> PlanResult<()> {
        if let Some(parent) = self.db_path(project_root).parent() {
            std::fs::create_dir_all(parent).map_err(|e| PlanError::io(parent, e))?;
        }
        Ok(())
    }
}

/// Location of the project config file.
pub fn config_path(project_root: &Path) -> PathBuf {
    match std::env::var("TASKPLAN_CONFIG_PATH") {
        Ok(explicit) => PathBuf::from(explicit),
        Err(_) => project_root.join(CONFIG_FILE_NAME),
    }
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
