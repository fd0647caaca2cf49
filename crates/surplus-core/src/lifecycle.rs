use thiserror::Error;

use crate::model::{Task, TaskQueue, TaskStatus};

/// Things that move a task between statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Operator switches a parked task on.
    Enable,
    /// Picked by a cycle, immediately before execution.
    Select,
    /// Executor reported success.
    Succeed { repeat: bool },
    /// Executor reported failure.
    Fail,
    /// Operator puts a finished, failed or orphaned task back on.
    Reset,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot apply {event:?} to a task in status {from}")]
pub struct LifecycleError {
    pub from: TaskStatus,
    pub event: LifecycleEvent,
}

/// Transition table:
///
/// ```text
/// off     --enable-->            on
/// on      --select-->            running
/// running --succeed(repeat)-->   on
/// running --succeed(!repeat)-->  done
/// running --fail-->              failed
/// done | failed | running --reset--> on
/// ```
pub fn next_status(from: TaskStatus, event: LifecycleEvent) -> Result<TaskStatus, LifecycleError> {
    use LifecycleEvent::*;
    use TaskStatus::*;

    let to = match (from, event) {
        (Off, Enable) => On,
        (On, Select) => Running,
        (Running, Succeed { repeat: true }) => On,
        (Running, Succeed { repeat: false }) => Done,
        (Running, Fail) => Failed,
        (Done | Failed | Running, Reset) => On,
        _ => return Err(LifecycleError { from, event }),
    };
    Ok(to)
}

/// Status a task ends in after an execution attempt.
pub fn status_after_run(task: &Task, success: bool) -> TaskStatus {
    let event = if success {
        LifecycleEvent::Succeed { repeat: task.repeat }
    } else {
        LifecycleEvent::Fail
    };
    next_status(TaskStatus::Running, event).unwrap_or(TaskStatus::Failed)
}

/// Next task to run: `on` tasks, minus those whose own cap exceeds
/// `budget_ceiling` when one is given, ordered by ascending priority. Ties
/// keep list order.
pub fn select(tasks: &[Task], budget_ceiling: Option<f64>) -> Option<&Task> {
    let mut candidates: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::On)
        .filter(|t| match (budget_ceiling, t.max_budget_usd) {
            (Some(ceiling), Some(cap)) => cap <= ceiling,
            _ => true,
        })
        .collect();
    // stable
    candidates.sort_by_key(|t| t.priority);
    candidates.into_iter().next()
}

/// Overwrites a task's status in place. Returns whether the task was found;
/// an unknown id is not an error.
pub fn transition(queue: &mut TaskQueue, task_id: &str, status: TaskStatus) -> bool {
    match queue.get_mut(task_id) {
        Some(task) => {
            task.status = status;
            true
        }
        None => false,
    }
}

/// Applies a lifecycle event to one task, checking the transition table.
/// `Ok(None)` when the id is not in the queue.
pub fn apply_event(
    queue: &mut TaskQueue,
    task_id: &str,
    event: LifecycleEvent,
) -> Result<Option<TaskStatus>, LifecycleError> {
    let Some(task) = queue.get_mut(task_id) else {
        return Ok(None);
    };
    let to = next_status(task.status, event)?;
    task.status = to;
    Ok(Some(to))
}
