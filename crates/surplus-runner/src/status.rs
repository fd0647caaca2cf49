use std::fmt::Write as _;

use serde::Serialize;
use surplus_core::{Decision, HistoryRecord, Task, TaskStatus, TelemetryModel, Thresholds};

use crate::config::WatchConfig;

pub const STATUS_HISTORY_LEN: usize = 10;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHoursState {
    pub start: Option<String>,
    pub end: Option<String>,
    pub active: bool,
}

impl QuietHoursState {
    pub fn now(watch: &WatchConfig) -> Self {
        Self {
            start: watch.quiet_hours_start.clone(),
            end: watch.quiet_hours_end.clone(),
            active: watch.is_quiet_now(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLine {
    pub id: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub name: String,
}

impl From<&Task> for TaskLine {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            status: t.status,
            priority: t.priority,
            name: t.label().to_string(),
        }
    }
}

/// Read-only dashboard snapshot.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub telemetry: TelemetryModel,
    pub thresholds: Thresholds,
    pub quiet_hours: QuietHoursState,
    pub decision: Decision,
    pub queue: Vec<TaskLine>,
    pub history: Vec<HistoryRecord>,
}

fn pct(f: f64) -> String {
    format!("{:.1}%", f * 100.0)
}

impl StatusReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let t = &self.thresholds;

        let _ = writeln!(out, "telemetry: {}", self.telemetry);
        match self.telemetry {
            TelemetryModel::RateLimit => {
                let _ = writeln!(out, "threshold: max utilization {}", pct(t.max_utilization));
            }
            TelemetryModel::Billing => {
                let _ = writeln!(
                    out,
                    "thresholds: min {:.0} min remaining, block cap ${:.2}, weekly budget ${:.2} (week starts {})",
                    t.min_remaining_minutes, t.max_block_cost_usd, t.weekly_budget_usd, t.weekly_start_day
                );
            }
        }

        let q = &self.quiet_hours;
        match (&q.start, &q.end) {
            (Some(s), Some(e)) => {
                let state = if q.active { "active now" } else { "inactive" };
                let _ = writeln!(out, "quiet hours: {s}-{e} ({state})");
            }
            _ => {
                let _ = writeln!(out, "quiet hours: none");
            }
        }

        let d = &self.decision;
        let verdict = if d.should_run { "RUN" } else { "SKIP" };
        let _ = writeln!(out, "decision: {verdict}: {}", d.reason);
        if let (Some(w), Some(u)) = (&d.binding_window, d.utilization) {
            let _ = writeln!(out, "binding window: {w} at {}", pct(u));
        }
        if let Some(b) = d.available_budget {
            let _ = writeln!(out, "available budget: ${b:.2}");
        }

        let _ = writeln!(out, "\nqueue ({} tasks):", self.queue.len());
        for line in &self.queue {
            let _ = writeln!(out, "  {:<20} {:<8} p{:<4} {}", line.id, line.status.as_str(), line.priority, line.name);
        }

        let _ = writeln!(out, "\nrecent runs:");
        if self.history.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for r in &self.history {
            let outcome = if r.success { "ok" } else { "FAILED" };
            let cost = r.cost_usd.map_or_else(|| "-".to_string(), |c| format!("${c:.2}"));
            let _ = write!(
                out,
                "  {} {:<20} {:<6} {:>8} {:>6.1}s",
                r.timestamp.format("%Y-%m-%d %H:%M"),
                r.task_id,
                outcome,
                cost,
                r.duration_ms as f64 / 1000.0
            );
            if let Some(e) = &r.error {
                let excerpt: String = e.chars().take(80).collect();
                let _ = write!(out, "  {excerpt}");
            }
            out.push('\n');
        }
        out
    }
}
