//! Workflow configuration: the status graph, per-status metadata and the
//! special status sets.
//!
//! Read from the `status_flow*`, `status_metadata`, `special_statuses` and
//! `require_rejection_reason` keys of `.taskplan.json`. When the file is
//! absent, has no `status_flow`, or fails to parse or validate, the built-in
//! [`WorkflowConfig::default`] is used instead.
//!
//! ```json
//! {
//!   "status_flow_version": "1.0",
//!   "status_flow": {
//!     "todo": ["in_progress", "blocked"],
//!     "in_progress": ["ready_for_review", "blocked"],
//!     "ready_for_review": ["completed", "in_progress"],
//!     "completed": [],
//!     "blocked": ["todo", "in_progress"]
//!   },
//!   "status_metadata": {
//!     "todo": { "phase": "planning", "color": "gray" },
//!     "in_progress": { "phase": "development" },
//!     "ready_for_review": { "phase": "review" },
//!     "completed": { "phase": "done" },
//!     "blocked": { "phase": "any" }
//!   },
//!   "special_statuses": { "_start_": ["todo"], "_complete_": ["completed"] }
//! }
//! ```

use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use tracing::{debug, warn};

/// Special status set holding the entry statuses for new tasks.
pub const START_STATUS_KEY: &str = "_start_";
/// Special status set holding terminal statuses.
pub const COMPLETE_STATUS_KEY: &str = "_complete_";
/// Special status set holding parking statuses (blocked, on hold).
pub const BLOCKED_STATUS_KEY: &str = "_blocked_";

/// Initial status when the workflow defines no start statuses.
pub const DEFAULT_INITIAL_STATUS: &str = "draft";

/// The only workflow schema version understood.
pub const SUPPORTED_WORKFLOW_VERSION: &str = "1.0";

/// Display and phase metadata for one status. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusMetadata {
    /// Workflow phase (`planning`, `development`, `review`, `qa`,
    /// `approval`, `done`) or `any` for statuses outside the ordering.
    #[serde(default)]
    pub phase: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Agent types that pick up tasks in this status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_types: Vec<String>,

    /// Contribution to feature progress, 0.0 to 1.0.
    #[serde(default)]
    pub progress_weight: f64,
}

/// Configurable status workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(rename = "status_flow_version", default = "default_version")]
    pub version: String,

    /// Status -> statuses it may move to. An empty list marks a terminal status.
    #[serde(default)]
    pub status_flow: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub status_metadata: BTreeMap<String, StatusMetadata>,

    /// Named status sets, notably `_start_` and `_complete_`.
    #[serde(default)]
    pub special_statuses: BTreeMap<String, Vec<String>>,

    /// Whether backward transitions need a reason.
    #[serde(default = "default_true")]
    pub require_rejection_reason: bool,
}

fn default_version() -> String {
    SUPPORTED_WORKFLOW_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

impl WorkflowConfig {
    /// Load the workflow section from a config file.
    ///
    /// Returns `Ok(None)` when the file does not exist or defines no
    /// `status_flow`.
    pub fn load<P: AsRef<Path>>(path: P) -> PlanResult<Option<Self>> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PlanError::io(path, e)),
        };

        let raw: Value = serde_json::from_str(&content)?;
        if raw.get("status_flow").is_none() {
            return Ok(None);
        }

        let workflow: WorkflowConfig = serde_json::from_value(raw)?;
        if workflow.version != SUPPORTED_WORKFLOW_VERSION {
            return Err(PlanError::invalid(
                "status_flow_version",
                format!(
                    "unsupported workflow version {} (supported: {})",
                    workflow.version, SUPPORTED_WORKFLOW_VERSION
                ),
            ));
        }
        workflow.validate()?;
        Ok(Some(workflow))
    }

    /// Load the workflow from a config file, falling back to the default.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(Some(workflow)) => {
                debug!(path = %path.display(), statuses = workflow.status_flow.len(), "Loaded workflow config");
                workflow
            }
            Ok(None) => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid workflow config, using default workflow");
                Self::default()
            }
        }
    }

    /// Check structural soundness of the workflow.
    pub fn validate(&self) -> PlanResult<()> {
        let start = self.start_statuses();
        if start.is_empty() {
            return Err(PlanError::invalid(
                "special_statuses",
                format!("missing required special status '{START_STATUS_KEY}'"),
            ));
        }
        let complete = self.complete_statuses();
        if complete.is_empty() {
            return Err(PlanError::invalid(
                "special_statuses",
                format!("missing required special status '{COMPLETE_STATUS_KEY}'"),
            ));
        }

        for status in start.iter().chain(complete.iter()) {
            if !self.status_flow.contains_key(status) {
                return Err(PlanError::invalid(
                    "special_statuses",
                    format!("special status '{status}' is not defined in status_flow"),
                ));
            }
        }

        for (from, exits) in &self.status_flow {
            for to in exits {
                if !self.status_flow.contains_key(to) {
                    return Err(PlanError::invalid(
                        "status_flow",
                        format!("transition {from} -> {to} targets an undefined status"),
                    ));
                }
            }
        }

        let reachable = self.reachable_from(start);
        let unreachable: Vec<&str> = self
            .status_flow
            .keys()
            .filter(|s| !reachable.contains(s.as_str()))
            .map(|s| s.as_str())
            .collect();
        if !unreachable.is_empty() {
            return Err(PlanError::invalid(
                "status_flow",
                format!(
                    "statuses unreachable from '{START_STATUS_KEY}': {}",
                    unreachable.join(", ")
                ),
            ));
        }

        Ok(())
    }

    fn reachable_from<'a>(&'a self, start: &'a [String]) -> BTreeSet<&'a str> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = start.iter().map(|s| s.as_str()).collect();
        while let Some(status) = queue.pop_front() {
            if !seen.insert(status) {
                continue;
            }
            for next in self.exits(status) {
                if !seen.contains(next.as_str()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Whether a status is defined in `status_flow`.
    pub fn is_defined(&self, status: &str) -> bool {
        self.status_flow.contains_key(status)
    }

    /// Allowed next statuses; empty for terminal or unknown statuses.
    pub fn exits(&self, status: &str) -> &[String] {
        self.status_flow
            .get(status)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn metadata(&self, status: &str) -> Option<&StatusMetadata> {
        self.status_metadata.get(status)
    }

    pub fn special(&self, name: &str) -> &[String] {
        self.special_statuses
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn start_statuses(&self) -> &[String] {
        self.special(START_STATUS_KEY)
    }

    pub fn complete_statuses(&self) -> &[String] {
        self.special(COMPLETE_STATUS_KEY)
    }

    pub fn is_complete_status(&self, status: &str) -> bool {
        self.complete_statuses().iter().any(|s| s == status)
    }
}

impl Default for WorkflowConfig {
    /// Full refinement -> development -> review -> qa -> approval workflow.
    fn default() -> Self {
        let mut status_flow = BTreeMap::new();
        let mut status_metadata = BTreeMap::new();

        for (status, phase, color, weight, description, exits) in DEFAULT_STATUSES {
            status_flow.insert(
                status.to_string(),
                exits.iter().map(|s| s.to_string()).collect(),
            );
            status_metadata.insert(
                status.to_string(),
                StatusMetadata {
                    phase: phase.to_string(),
                    color: Some(color.to_string()),
                    description: Some(description.to_string()),
                    agent_types: Vec::new(),
                    progress_weight: *weight,
                },
            );
        }

        let mut special_statuses = BTreeMap::new();
        special_statuses.insert(
            START_STATUS_KEY.to_string(),
            vec!["draft".to_string(), "ready_for_development".to_string()],
        );
        special_statuses.insert(
            COMPLETE_STATUS_KEY.to_string(),
            vec!["completed".to_string(), "cancelled".to_string()],
        );
        special_statuses.insert(
            BLOCKED_STATUS_KEY.to_string(),
            vec!["blocked".to_string(), "on_hold".to_string()],
        );

        Self {
            version: default_version(),
            status_flow,
            status_metadata,
            special_statuses,
            require_rejection_reason: true,
        }
    }
}

type StatusRow = (
    &'static str,
    &'static str,
    &'static str,
    f64,
    &'static str,
    &'static [&'static str],
);

// (status, phase, color, progress weight, description, exits)
const DEFAULT_STATUSES: &[StatusRow] = &[
    ("draft", "planning", "gray", 0.0, "Task created but not yet refined",
        &["ready_for_refinement_ba", "cancelled", "on_hold"]),
    ("ready_for_refinement_ba", "planning", "cyan", 0.05, "Awaiting business analysis",
        &["in_refinement_ba", "on_hold"]),
    ("in_refinement_ba", "planning", "cyan", 0.1, "Under business analysis",
        &["ready_for_refinement_tech", "draft", "blocked", "on_hold"]),
    ("ready_for_refinement_tech", "planning", "blue", 0.15, "Awaiting technical review",
        &["in_refinement_tech", "on_hold"]),
    ("in_refinement_tech", "planning", "blue", 0.2, "Under technical review",
        &["ready_for_development", "draft", "blocked", "on_hold"]),
    ("ready_for_development", "planning", "orange", 0.25, "Ready for development",
        &["in_development", "ready_for_refinement_ba", "cancelled", "on_hold"]),
    ("in_development", "development", "yellow", 0.5, "Code implementation in progress",
        &["ready_for_code_review", "ready_for_refinement_ba", "blocked", "on_hold"]),
    ("ready_for_code_review", "review", "magenta", 0.75, "Awaiting code review",
        &["in_code_review", "in_development", "on_hold"]),
    ("in_code_review", "review", "magenta", 0.8, "Under code review",
        &["ready_for_qa", "changes_requested", "in_development", "ready_for_refinement_ba", "on_hold"]),
    ("changes_requested", "development", "orange", 0.6, "Code review changes requested",
        &["ready_for_code_review", "in_development", "on_hold"]),
    ("ready_for_qa", "qa", "cyan", 0.85, "Ready for QA testing",
        &["in_qa", "on_hold"]),
    ("in_qa", "qa", "green", 0.85, "Being tested",
        &["ready_for_approval", "qa_failed", "in_development", "ready_for_refinement_ba", "blocked", "on_hold"]),
    ("qa_failed", "development", "orange", 0.5, "QA testing failed",
        &["ready_for_code_review", "in_development", "on_hold"]),
    ("ready_for_approval", "approval", "cyan", 0.9, "Ready for final approval",
        &["in_approval", "on_hold"]),
    ("in_approval", "approval", "purple", 0.95, "Under final review",
        &["completed", "ready_for_qa", "ready_for_development", "ready_for_refinement_ba", "on_hold"]),
    ("completed", "done", "white", 1.0, "Task finished and approved", &[]),
    ("cancelled", "done", "gray", 0.0, "Task abandoned or deprecated", &[]),
    ("blocked", "any", "red", 0.0, "Temporarily blocked by external dependency",
        &["ready_for_development", "ready_for_refinement_ba", "cancelled"]),
    ("on_hold", "any", "orange", 0.0, "Intentionally paused",
        &["ready_for_refinement_ba", "ready_for_development", "cancelled"]),
];
