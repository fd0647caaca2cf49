//! Cycle behaviour against in-process fakes.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use surplus_core::{
    BillingBlock, BillingSnapshot, ExecutionResult, Task, TaskQueue, TaskStatus, TelemetryModel, Thresholds,
    UsageSnapshot, UsageWindow, WindowSnapshot,
};
use surplus_runner::{Cycle, CycleOutcome, TaskExecutor};
use surplus_storage::{HistoryFile, QueueFile};
use surplus_telemetry::{TelemetryError, UsageSource};

struct FakeSource(Option<UsageSnapshot>);

#[async_trait]
impl UsageSource for FakeSource {
    fn model(&self) -> TelemetryModel {
        match &self.0 {
            Some(s) => s.model(),
            None => TelemetryModel::RateLimit,
        }
    }

    async fn fetch(&self) -> Result<UsageSnapshot, TelemetryError> {
        self.0
            .clone()
            .ok_or_else(|| TelemetryError::Malformed("fake outage".into()))
    }
}

/// Records what it was asked to run and the queue status it saw meanwhile.
struct FakeExecutor {
    succeed: bool,
    queue: QueueFile,
    remove_task_during_run: bool,
    calls: Mutex<Vec<(String, Option<f64>, Option<TaskStatus>)>>,
}

impl FakeExecutor {
    fn new(queue: &QueueFile, succeed: bool) -> Self {
        Self {
            succeed,
            queue: queue.clone(),
            remove_task_during_run: false,
            calls: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl TaskExecutor for FakeExecutor {
    async fn run(&self, task: &Task, budget: Option<f64>) -> ExecutionResult {
        let mut q = self.queue.load().unwrap();
        let seen = q.get(&task.id).map(|t| t.status);
        if self.remove_task_during_run {
            q.tasks.retain(|t| t.id != task.id);
            self.queue.save(&q).unwrap();
        }
        self.calls.lock().unwrap().push((task.id.clone(), budget, seen));
        if self.succeed {
            ExecutionResult {
                success: true,
                cost_usd: Some(0.42),
                duration_ms: 5,
                error: None,
                raw_output: serde_json::json!({"result": "ok"}),
                exit_code: Some(0),
            }
        } else {
            ExecutionResult::failed("exit 1: boom", 5)
        }
    }
}

fn window_snapshot(utilization: f64) -> UsageSnapshot {
    let mut snap = WindowSnapshot::default();
    snap.windows.insert(
        "5h".into(),
        UsageWindow { utilization, status: "allowed".into(), reset_at: None },
    );
    UsageSnapshot::RateLimit(snap)
}

fn write_queue(path: &Path, repeat: bool) -> QueueFile {
    let mut a = Task::new("alpha", "Alpha", "do alpha");
    a.status = TaskStatus::On;
    a.priority = 1;
    a.repeat = repeat;
    let mut b = Task::new("beta", "Beta", "do beta");
    b.status = TaskStatus::Off;
    let q = QueueFile::new(path);
    q.save(&TaskQueue::new(vec![a, b])).unwrap();
    q
}

fn status_of(q: &QueueFile, id: &str) -> Option<TaskStatus> {
    q.load().unwrap().get(id).map(|t| t.status)
}

struct Fixture {
    _dir: tempfile::TempDir,
    queue: QueueFile,
    history: HistoryFile,
    thresholds: Thresholds,
}

fn fixture(repeat: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let queue = write_queue(&dir.path().join("tasks.json"), repeat);
    let history = HistoryFile::new(dir.path().join("history.json"));
    Fixture { _dir: dir, queue, history, thresholds: Thresholds::default() }
}

impl Fixture {
    fn cycle<'a>(&'a self, source: &'a FakeSource, executor: &'a FakeExecutor) -> Cycle<'a> {
        Cycle {
            source,
            executor,
            queue: &self.queue,
            history: &self.history,
            thresholds: &self.thresholds,
            telemetry_timeout: Duration::from_secs(5),
        }
    }
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let f = fixture(false);
    std::fs::write(f.history.path(), "[]\n").unwrap();
    let source = FakeSource(Some(window_snapshot(0.5)));
    let exec = FakeExecutor::new(&f.queue, true);

    let queue_before = std::fs::read(f.queue.path()).unwrap();
    let history_before = std::fs::read(f.history.path()).unwrap();

    let outcome = f.cycle(&source, &exec).run(true).await;
    let CycleOutcome::DryRun { task, decision } = outcome else {
        panic!("expected dry run, got {outcome:?}");
    };
    assert_eq!(task.id, "alpha");
    assert!(decision.should_run);

    assert_eq!(std::fs::read(f.queue.path()).unwrap(), queue_before);
    assert_eq!(std::fs::read(f.history.path()).unwrap(), history_before);
    assert!(exec.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn repeating_task_goes_running_then_back_on() {
    let f = fixture(true);
    let source = FakeSource(Some(window_snapshot(0.3)));
    let exec = FakeExecutor::new(&f.queue, true);

    let outcome = f.cycle(&source, &exec).run(false).await;
    let CycleOutcome::Executed { new_status, result, .. } = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert!(result.success);
    assert_eq!(new_status, TaskStatus::On);

    let calls = exec.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].2, Some(TaskStatus::Running));
    assert_eq!(status_of(&f.queue, "alpha"), Some(TaskStatus::On));
    assert_eq!(status_of(&f.queue, "beta"), Some(TaskStatus::Off));

    let history = f.history.recent(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_id, "alpha");
    assert_eq!(history[0].cost_usd, Some(0.42));
}

#[tokio::test]
async fn failure_marks_task_failed_and_is_recorded() {
    let f = fixture(true);
    let source = FakeSource(Some(window_snapshot(0.3)));
    let exec = FakeExecutor::new(&f.queue, false);

    let outcome = f.cycle(&source, &exec).run(false).await;
    assert!(matches!(outcome, CycleOutcome::Executed { new_status: TaskStatus::Failed, .. }));
    assert_eq!(status_of(&f.queue, "alpha"), Some(TaskStatus::Failed));

    let history = f.history.recent(10).unwrap();
    assert!(!history[0].success);
    assert_eq!(history[0].error.as_deref(), Some("exit 1: boom"));

    // a failed task is not picked again
    let again = f.cycle(&source, &exec).run(false).await;
    assert!(matches!(again, CycleOutcome::NoTask { .. }));
}

#[tokio::test]
async fn telemetry_outage_skips_without_side_effects() {
    let f = fixture(false);
    let source = FakeSource(None);
    let exec = FakeExecutor::new(&f.queue, true);
    let before = std::fs::read(f.queue.path()).unwrap();

    let outcome = f.cycle(&source, &exec).run(false).await;
    let CycleOutcome::Skipped { reason } = outcome else {
        panic!("expected skip, got {outcome:?}");
    };
    assert!(reason.contains("unavailable"), "{reason}");
    assert_eq!(std::fs::read(f.queue.path()).unwrap(), before);
    assert!(!f.history.path().exists());
}

#[tokio::test]
async fn busy_window_skips_with_numbers() {
    let f = fixture(false);
    let source = FakeSource(Some(window_snapshot(0.93)));
    let exec = FakeExecutor::new(&f.queue, true);

    let CycleOutcome::Skipped { reason } = f.cycle(&source, &exec).run(false).await else {
        panic!("expected skip");
    };
    assert!(reason.contains("93.0%") && reason.contains("80.0%"), "{reason}");
    assert!(exec.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn billing_budget_caps_uncapped_task() {
    let f = fixture(false);
    let source = FakeSource(Some(UsageSnapshot::Billing(BillingSnapshot {
        active_block: Some(BillingBlock { remaining_minutes: 200.0, total_cost: 6.5 }),
        weekly_cost: 20.0,
    })));
    let exec = FakeExecutor::new(&f.queue, true);

    let outcome = f.cycle(&source, &exec).run(false).await;
    assert!(matches!(outcome, CycleOutcome::Executed { new_status: TaskStatus::Done, .. }));
    assert_eq!(exec.calls.lock().unwrap()[0].1, Some(3.5));
}

#[tokio::test]
async fn task_removed_mid_run_does_not_break_cycle() {
    let f = fixture(false);
    let source = FakeSource(Some(window_snapshot(0.1)));
    let mut exec = FakeExecutor::new(&f.queue, true);
    exec.remove_task_during_run = true;

    let outcome = f.cycle(&source, &exec).run(false).await;
    assert!(matches!(outcome, CycleOutcome::Executed { .. }));
    let q = f.queue.load().unwrap();
    assert!(q.get("alpha").is_none());
    assert_eq!(q.tasks.len(), 1);
    assert_eq!(f.history.recent(10).unwrap().len(), 1);
}

#[tokio::test]
async fn empty_queue_is_no_task() {
    let dir = tempfile::tempdir().unwrap();
    let f = Fixture {
        queue: QueueFile::new(dir.path().join("missing.json")),
        history: HistoryFile::new(dir.path().join("history.json")),
        thresholds: Thresholds::default(),
        _dir: dir,
    };
    let source = FakeSource(Some(window_snapshot(0.1)));
    let exec = FakeExecutor::new(&f.queue, true);

    let CycleOutcome::NoTask { reason } = f.cycle(&source, &exec).run(false).await else {
        panic!("expected no task");
    };
    assert!(reason.contains("0 queued"), "{reason}");
    assert!(!f.queue.path().exists());
}
