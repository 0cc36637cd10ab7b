//! Task markdown rendering.
//!
//! Templates are looked up by agent type:
//! 1. An explicit override file passed by the caller
//! 2. `{template_dir}/task-{agent}.md`
//! 3. The built-in `task-{agent}.md`
//! 4. `{template_dir}/task-general.md`
//! 5. The built-in general template

use crate::error::{PlanError, PlanResult};
use crate::types::DEFAULT_AGENT_TYPE;
use minijinja::Environment;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("general", include_str!("../templates/task-general.md")),
    ("backend", include_str!("../templates/task-backend.md")),
    ("frontend", include_str!("../templates/task-frontend.md")),
    ("testing", include_str!("../templates/task-testing.md")),
];

/// Variables available to task templates.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateData {
    pub key: String,
    pub title: String,
    pub description: String,
    pub epic: String,
    pub feature: String,
    pub agent_type: String,
    pub priority: i32,
    pub status: String,
    pub depends_on: Vec<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// `YYYY-MM-DD` creation date.
    pub created_date: String,
}

/// Produces the markdown body of a new task file.
pub trait Renderer {
    fn render(
        &self,
        agent_type: &str,
        template_override: Option<&Path>,
        data: &TemplateData,
    ) -> PlanResult<String>;
}

/// Renders minijinja templates from a directory with built-in fallbacks.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    template_dir: Option<PathBuf>,
}

impl TemplateRenderer {
    pub fn new(template_dir: Option<PathBuf>) -> Self {
        Self { template_dir }
    }

    /// Source and display name of the template for an agent type.
    fn select(&self, agent_type: &str, template_override: Option<&Path>) -> PlanResult<(String, String)> {
        if let Some(path) = template_override {
            let source =
                std::fs::read_to_string(path).map_err(|e| PlanError::io(path, e))?;
            return Ok((path.display().to_string(), source));
        }

        let agent = agent_type.trim().to_lowercase();
        if is_safe_template_name(&agent) {
            if let Some(found) = self.lookup(&agent)? {
                return Ok(found);
            }
        }

        match self.lookup(DEFAULT_AGENT_TYPE)? {
            Some(found) => Ok(found),
            None => Err(PlanError::Template {
                template: format!("task-{DEFAULT_AGENT_TYPE}.md"),
                reason: "no general template available".to_string(),
            }),
        }
    }

    fn lookup(&self, agent: &str) -> PlanResult<Option<(String, String)>> {
        let file_name = format!("task-{agent}.md");

        if let Some(dir) = &self.template_dir {
            let path = dir.join(&file_name);
            if path.is_file() {
                let source =
                    std::fs::read_to_string(&path).map_err(|e| PlanError::io(&path, e))?;
                return Ok(Some((path.display().to_string(), source)));
            }
        }

        Ok(BUILTIN_TEMPLATES
            .iter()
            .find(|(name, _)| *name == agent)
            .map(|(_, source)| (format!("builtin:{file_name}"), (*source).to_string())))
    }
}

impl Renderer for TemplateRenderer {
    fn render(
        &self,
        agent_type: &str,
        template_override: Option<&Path>,
        data: &TemplateData,
    ) -> PlanResult<String> {
        let (name, source) = self.select(agent_type, template_override)?;
        debug!(template = %name, key = %data.key, "Rendering task template");

        let environment = Environment::new();
        environment
            .render_str(&source, data)
            .map_err(|error| PlanError::Template {
                template: name,
                reason: error.to_string(),
            })
    }
}

// Agent types are free-form; only plain names may become file names.
fn is_safe_template_name(agent: &str) -> bool {
    !agent.is_empty()
        && agent
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
