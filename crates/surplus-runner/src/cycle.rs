//! One cycle: fetch, evaluate, select, execute, record.

use std::time::Duration;

use chrono::Utc;
use surplus_core::{evaluate, select, status_after_run, Decision, ExecutionResult, HistoryRecord, Task, TaskStatus, Thresholds};
use surplus_storage::{HistoryFile, QueueFile};
use surplus_telemetry::{fetch_or_log, UsageSource};
use tracing::{error, info, warn};

use crate::executor::TaskExecutor;

#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The evaluator said no.
    Skipped { reason: String },
    /// Running was allowed but nothing in the queue qualified.
    NoTask { reason: String },
    /// Selection happened; nothing was touched.
    DryRun { task: Task, decision: Decision },
    Executed {
        task: Task,
        result: ExecutionResult,
        new_status: TaskStatus,
    },
    /// The task could not be marked running, so it was not started.
    Aborted { task_id: String, reason: String },
    /// Suppressed by quiet hours; telemetry was not fetched.
    QuietHours,
}

/// Collaborators of a cycle. Borrowed so the watch loop can reuse them.
pub struct Cycle<'a> {
    pub source: &'a dyn UsageSource,
    pub executor: &'a dyn TaskExecutor,
    pub queue: &'a QueueFile,
    pub history: &'a HistoryFile,
    pub thresholds: &'a Thresholds,
    pub telemetry_timeout: Duration,
}

impl Cycle<'_> {
    /// Evaluate and select only. Reads telemetry and the queue, writes nothing.
    pub async fn plan(&self) -> Result<(Task, Decision), CycleOutcome> {
        let snapshot = fetch_or_log(self.source, self.telemetry_timeout).await;
        let decision = evaluate(snapshot.as_ref(), self.thresholds);
        if !decision.should_run {
            info!(reason = %decision.reason, "skipping cycle");
            return Err(CycleOutcome::Skipped {
                reason: decision.reason,
            });
        }
        info!(reason = %decision.reason, budget = ?decision.available_budget, "usage allows a run");

        let queue = self.queue.load_or_empty();
        let Some(task) = select(&queue.tasks, decision.available_budget) else {
            let on = queue.tasks.iter().filter(|t| t.status == TaskStatus::On).count();
            let reason = match decision.available_budget {
                Some(b) => format!("no eligible task ({} queued, {on} on, budget ${b:.2})", queue.tasks.len()),
                None => format!("no eligible task ({} queued, {on} on)", queue.tasks.len()),
            };
            info!(%reason, "nothing to run");
            return Err(CycleOutcome::NoTask { reason });
        };
        info!(task_id = %task.id, name = task.label(), priority = task.priority, "selected task");
        Ok((task.clone(), decision))
    }

    pub async fn run(&self, dry_run: bool) -> CycleOutcome {
        let (task, decision) = match self.plan().await {
            Ok(planned) => planned,
            Err(outcome) => return outcome,
        };

        if dry_run {
            info!(task_id = %task.id, "dry run; would execute this task");
            return CycleOutcome::DryRun { task, decision };
        }

        match self.queue.update_status(&task.id, TaskStatus::Running) {
            Ok(true) => {}
            Ok(false) => {
                return CycleOutcome::Aborted {
                    task_id: task.id,
                    reason: "task vanished from the queue before it started".into(),
                }
            }
            Err(e) => {
                error!(task_id = %task.id, error = ?e, "could not mark task running; not starting it");
                return CycleOutcome::Aborted {
                    task_id: task.id,
                    reason: format!("{e:#}"),
                };
            }
        }

        let result = self.executor.run(&task, decision.available_budget).await;

        let new_status = status_after_run(&task, result.success);
        match self.queue.update_status(&task.id, new_status) {
            Ok(true) => info!(task_id = %task.id, status = %new_status, "task status updated"),
            Ok(false) => warn!(
                task_id = %task.id,
                status = %new_status,
                "task left the queue during the run; status not recorded"
            ),
            Err(e) => warn!(task_id = %task.id, status = %new_status, error = ?e, "failed to record task status"),
        }

        let record = HistoryRecord::from_result(&task, &result, Utc::now());
        match self.history.append(&record) {
            Ok(()) => info!(task_id = %task.id, success = result.success, "history appended"),
            Err(e) => warn!(task_id = %task.id, error = ?e, "failed to append history"),
        }

        CycleOutcome::Executed {
            task,
            result,
            new_status,
        }
    }
}
