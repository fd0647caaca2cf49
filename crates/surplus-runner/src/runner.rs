use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use surplus_core::{evaluate, LifecycleEvent, TaskStatus, TelemetryModel};
use surplus_storage::{HistoryFile, QueueFile, ReportStore, RunContextStore};
use surplus_telemetry::{fetch_or_log, BillingCommandSource, Credentials, RateLimitProbe, UsageSource};
use tracing::warn;

use crate::config::{expand, Config, Paths};
use crate::cycle::{Cycle, CycleOutcome};
use crate::executor::{CliExecutor, TaskExecutor};
use crate::scheduler::Scheduler;
use crate::status::{QuietHoursState, StatusReport, TaskLine, STATUS_HISTORY_LEN};

/// Everything a command needs, built once from the config.
pub struct Runner {
    pub cfg: Config,
    pub paths: Paths,
    pub queue: QueueFile,
    pub history: HistoryFile,
    pub source: Box<dyn UsageSource>,
    pub executor: Box<dyn TaskExecutor>,
}

/// Telemetry source for the configured model.
pub fn usage_source(cfg: &Config) -> Box<dyn UsageSource> {
    let t = &cfg.telemetry;
    match t.source {
        TelemetryModel::Billing => Box::new(BillingCommandSource::new(
            t.command.clone(),
            t.timeout(),
            cfg.thresholds.weekly_start_day,
        )),
        TelemetryModel::RateLimit => Box::new(RateLimitProbe::new(
            t.api_url.clone(),
            t.probe_model.clone(),
            Credentials::new(expand(&t.credentials_path)),
            t.timeout(),
        )),
    }
}

impl Runner {
    pub fn open(cfg: Config) -> Self {
        let paths = cfg.paths.resolve();
        let source = usage_source(&cfg);
        let executor = CliExecutor::new(
            cfg.execution.clone(),
            RunContextStore::new(paths.context_dir.clone()).with_max_chars(cfg.execution.context_max_chars),
            ReportStore::new(paths.reports_dir.clone()),
        );
        Self::with_parts(cfg, paths, source, Box::new(executor))
    }

    pub fn with_parts(cfg: Config, paths: Paths, source: Box<dyn UsageSource>, executor: Box<dyn TaskExecutor>) -> Self {
        Self {
            queue: QueueFile::new(paths.queue.clone()),
            history: HistoryFile::new(paths.history.clone()),
            cfg,
            paths,
            source,
            executor,
        }
    }

    fn cycle(&self) -> Cycle<'_> {
        Cycle {
            source: self.source.as_ref(),
            executor: self.executor.as_ref(),
            queue: &self.queue,
            history: &self.history,
            thresholds: &self.cfg.thresholds,
            telemetry_timeout: self.cfg.telemetry.timeout(),
        }
    }

    pub async fn run_once(&self, dry_run: bool) -> CycleOutcome {
        self.cycle().run(dry_run).await
    }

    pub async fn watch(&self, shutdown: Arc<AtomicBool>) -> u64 {
        let scheduler = Scheduler::new(self.cfg.watch.clone(), shutdown);
        scheduler.run(|| self.run_once(false)).await
    }

    /// Fetches telemetry and reads the queue and history; writes nothing.
    pub async fn status(&self) -> StatusReport {
        let snapshot = fetch_or_log(self.source.as_ref(), self.cfg.telemetry.timeout()).await;
        let decision = evaluate(snapshot.as_ref(), &self.cfg.thresholds);
        let queue = self.queue.load_or_empty();
        let history = self.history.recent(STATUS_HISTORY_LEN).unwrap_or_else(|e| {
            warn!(error = ?e, "history unreadable");
            vec![]
        });
        StatusReport {
            telemetry: self.source.model(),
            thresholds: self.cfg.thresholds.clone(),
            quiet_hours: QuietHoursState::now(&self.cfg.watch),
            decision,
            queue: queue.tasks.iter().map(TaskLine::from).collect(),
            history,
        }
    }

    /// off -> on.
    pub fn enable(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        self.queue.apply(task_id, LifecycleEvent::Enable)
    }

    /// done, failed or running -> on.
    pub fn reset(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        self.queue.apply(task_id, LifecycleEvent::Reset)
    }
}
