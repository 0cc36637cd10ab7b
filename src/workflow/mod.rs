//! Workflow state machine.
//!
//! Statuses are nodes of the configured `status_flow` graph. Each status
//! belongs to a phase; phases are ordered `planning < development < review
//! < qa < approval < done`, and `any` (or a missing/unknown phase) sits
//! outside the ordering. A move to an earlier ordered phase is *backward*
//! and may need a reason. Backwardness is independent of graph validity.

pub mod transition;

pub use transition::TaskTransitions;

use crate::config::{DEFAULT_INITIAL_STATUS, WorkflowConfig};
use crate::error::{PlanError, PlanResult};

/// Ordinal of a phase name; 0 for `any`, empty and unknown phases.
pub fn phase_order(phase: &str) -> u8 {
    match phase {
        "planning" => 1,
        "development" => 2,
        "review" => 3,
        "qa" => 4,
        "approval" => 5,
        "done" => 6,
        _ => 0,
    }
}

/// Status graph checks over a [`WorkflowConfig`].
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    config: WorkflowConfig,
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new(WorkflowConfig::default())
    }
}

impl WorkflowStateMachine {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Fails unless `status` is a key of `status_flow`.
    pub fn validate_status(&self, status: &str) -> PlanResult<()> {
        if self.config.is_defined(status) {
            Ok(())
        } else {
            Err(PlanError::UnknownStatus(status.to_string()))
        }
    }

    /// Fails unless both statuses exist and `to` is an allowed exit of `from`.
    pub fn validate_transition(&self, from: &str, to: &str) -> PlanResult<()> {
        self.validate_status(from)?;
        self.validate_status(to)?;

        let exits = self.config.exits(from);
        if exits.iter().any(|s| s == to) {
            Ok(())
        } else {
            Err(PlanError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                allowed: exits.to_vec(),
            })
        }
    }

    /// Phase ordinal of a status; 0 when it has no ordered phase.
    pub fn status_phase_order(&self, status: &str) -> u8 {
        self.config
            .metadata(status)
            .map(|meta| phase_order(&meta.phase))
            .unwrap_or(0)
    }

    /// True when `to` is in an earlier ordered phase than `from`.
    ///
    /// Never true for a status against itself, nor when either side has no
    /// ordered phase (`any`, unset, or not in the metadata).
    pub fn is_backward(&self, from: &str, to: &str) -> bool {
        let current = self.status_phase_order(from);
        let next = self.status_phase_order(to);
        next < current && next > 0 && current > 0
    }

    /// Status assigned to newly created tasks.
    pub fn initial_status(&self) -> String {
        initial_status(Some(&self.config))
    }
}

/// First `_start_` status of the workflow, or the built-in default.
pub fn initial_status(config: Option<&WorkflowConfig>) -> String {
    config
        .and_then(|c| c.start_statuses().first().cloned())
        .unwrap_or_else(|| DEFAULT_INITIAL_STATUS.to_string())
}

/// Require a reason for backward transitions.
///
/// No-op when `new_status` is empty (nothing requested) or `force` is set.
/// Without a config, backward detection uses the default workflow and a
/// reason is required.
pub fn validate_reason_for_transition(
    new_status: &str,
    current_status: &str,
    reason: Option<&str>,
    force: bool,
    config: Option<&WorkflowConfig>,
) -> PlanResult<()> {
    if new_status.is_empty() || force {
        return Ok(());
    }

    let machine = match config {
        Some(config) => WorkflowStateMachine::new(config.clone()),
        None => WorkflowStateMachine::default(),
    };
    if !machine.is_backward(current_status, new_status) {
        return Ok(());
    }

    let required = config.is_none_or(|c| c.require_rejection_reason);
    let has_reason = reason.is_some_and(|r| !r.trim().is_empty());
    if required && !has_reason {
        return Err(PlanError::ReasonRequired);
    }
    Ok(())
}

/// Identity recorded on history rows.
///
/// `TASKPLAN_AGENT` wins, then the OS user, then `system`.
pub fn agent_identifier() -> String {
    ["TASKPLAN_AGENT", "USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "system".to_string())
}
