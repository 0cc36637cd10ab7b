//! Status changes on stored tasks.

use super::{WorkflowStateMachine, agent_identifier, validate_reason_for_transition};
use crate::db::history::insert_history;
use crate::db::tasks::{get_task_by_key, update_task_status};
use crate::db::{Database, now_utc};
use crate::error::{Entity, PlanError, PlanResult};
use crate::keys;
use crate::types::{NewHistory, StatusChangeRequest, Task};
use tracing::{info, warn};

/// Applies workflow-checked status changes and records their history.
#[derive(Clone)]
pub struct TaskTransitions {
    db: Database,
    machine: WorkflowStateMachine,
}

impl TaskTransitions {
    pub fn new(db: Database, machine: WorkflowStateMachine) -> Self {
        Self { db, machine }
    }

    /// Move a task to a new status.
    ///
    /// The status must exist in the workflow. Unless forced, the move must
    /// be an allowed edge and backward moves need a reason. The update and
    /// its history row commit together.
    pub fn change_status(&self, request: &StatusChangeRequest) -> PlanResult<Task> {
        let new_status = request.new_status.trim();
        self.machine.validate_status(new_status)?;
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        self.db.with_immediate_tx(|tx| {
            let task = get_task_by_key(&tx, &request.task_key)?.ok_or_else(|| {
                PlanError::not_found(Entity::Task, keys::normalize(&request.task_key))
            })?;
            let current = task.status.clone();

            if request.force {
                warn!(
                    task = %task.key,
                    from = %current,
                    to = %new_status,
                    "Forced status change bypasses workflow validation"
                );
            } else {
                self.machine.validate_transition(&current, new_status)?;
                validate_reason_for_transition(
                    new_status,
                    &current,
                    reason,
                    request.force,
                    Some(self.machine.config()),
                )?;
            }

            let now = now_utc();
            let started_at = (task.started_at.is_none()
                && self.machine.status_phase_order(new_status) >= super::phase_order("development")
                && !self.machine.config().is_complete_status(new_status))
            .then_some(now);
            let completed_at = (task.completed_at.is_none()
                && self.machine.config().is_complete_status(new_status))
            .then_some(now);

            update_task_status(&tx, task.id, new_status, started_at, completed_at, now)?;
            insert_history(
                &tx,
                &NewHistory {
                    task_id: task.id,
                    old_status: Some(current.clone()),
                    new_status: new_status.to_string(),
                    agent: Some(agent_identifier()),
                    notes: reason.map(String::from),
                    forced: request.force,
                    timestamp: now,
                },
            )?;

            let updated = get_task_by_key(&tx, &task.key)?
                .ok_or_else(|| PlanError::not_found(Entity::Task, task.key.clone()))?;
            tx.commit()?;

            info!(task = %updated.key, from = %current, to = %new_status, "Task status changed");
            Ok(updated)
        })
    }
}
