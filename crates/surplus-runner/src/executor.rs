//! Runs one task through the external task CLI.
//!
//! The child gets `-p <prompt> --output-format json` plus the effective
//! model, tool allow-list, spend cap and permission flags. Whatever happens,
//! a report and the task's run context are written before [`TaskExecutor::run`]
//! returns.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use surplus_core::{compose_prompt, failure_context, success_context, AllowedTools, ExecutionResult, Task};
use surplus_storage::{ReportStore, RunContextStore};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{expand, ExecutionConfig};
use crate::permissions::PermissionsGuard;

/// Field names tried, in order, for the cost of a run.
pub const COST_FIELDS: &[&str] = &["total_cost_usd", "cost_usd", "costUSD", "total_cost", "cost"];

const OUTPUT_TAIL_CHARS: usize = 2000;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executes `task`. `budget` is the evaluator's spend ceiling, if the
    /// telemetry model produces one. Never fails: problems are reported in the
    /// returned result.
    async fn run(&self, task: &Task, budget: Option<f64>) -> ExecutionResult;
}

/// Task settings after applying config defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectiveSettings {
    pub model: Option<String>,
    pub allowed_tools: Option<AllowedTools>,
    pub yolo: bool,
    pub max_budget_usd: Option<f64>,
}

impl EffectiveSettings {
    /// Task value, else config default, else unset.
    pub fn resolve(task: &Task, cfg: &ExecutionConfig, budget: Option<f64>) -> Self {
        Self {
            model: task.model.clone().or_else(|| cfg.model.clone()),
            allowed_tools: task
                .allowed_tools
                .clone()
                .or_else(|| cfg.default_allowed_tools.clone())
                .filter(|t| !t.is_empty()),
            yolo: task.yolo.unwrap_or(cfg.yolo),
            max_budget_usd: task.max_budget_usd.or(budget),
        }
    }

    pub fn args(&self, prefix: &[String], prompt: &str) -> Vec<String> {
        let mut args: Vec<String> = prefix.to_vec();
        args.extend(["-p".to_string(), prompt.to_string()]);
        args.extend(["--output-format".to_string(), "json".to_string()]);
        if let Some(model) = &self.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        if let Some(tools) = &self.allowed_tools {
            args.extend(["--allowedTools".to_string(), tools.to_arg()]);
        }
        if let Some(cap) = self.max_budget_usd {
            args.extend(["--max-budget-usd".to_string(), format!("{cap:.2}")]);
        }
        if self.yolo {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args
    }
}

/// First numeric cost field of the parsed output.
pub fn probe_cost(output: &Value) -> Option<f64> {
    COST_FIELDS.iter().find_map(|k| output.get(*k).and_then(Value::as_f64))
}

/// The textual result of a run: the `result` string, else the whole output.
pub fn result_text(output: &Value, stdout: &str) -> String {
    match output.get("result").and_then(Value::as_str) {
        Some(s) => s.to_string(),
        None => stdout.to_string(),
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let n = text.chars().count();
    if n <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(n - max_chars).collect()
    }
}

/// What came back from the child, before any files are written.
#[derive(Debug)]
struct Attempt {
    result: ExecutionResult,
    stdout: String,
    stderr: String,
}

impl Attempt {
    fn failed(error: String, started: Instant) -> Self {
        Self {
            result: ExecutionResult::failed(error, elapsed_ms(started)),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Turns exit status and captured output into a result. Output that is not
/// JSON is kept as `{"result": <text>}` and does not by itself fail the run.
pub fn interpret_output(exit_code: Option<i32>, stdout: &str, stderr: &str, duration_ms: u64) -> ExecutionResult {
    let raw_output = match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(v) => v,
        Err(_) => json!({ "result": stdout }),
    };
    let reported_error = raw_output.get("is_error").and_then(Value::as_bool) == Some(true);
    let success = exit_code == Some(0) && !reported_error;

    let error = if success {
        None
    } else if reported_error {
        Some(format!("executor reported an error: {}", tail(&result_text(&raw_output, stdout), 500)))
    } else {
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        Some(format!("exit {code}: {}", tail(detail, 500)))
    };

    ExecutionResult {
        success,
        cost_usd: probe_cost(&raw_output),
        duration_ms,
        error,
        raw_output,
        exit_code,
    }
}

/// Executor backed by the task CLI.
pub struct CliExecutor {
    pub settings: ExecutionConfig,
    pub contexts: RunContextStore,
    pub reports: ReportStore,
    /// Wall-clock limit for the child; `timeoutMinutes` from the config.
    pub time_limit: Duration,
}

impl CliExecutor {
    pub fn new(settings: ExecutionConfig, contexts: RunContextStore, reports: ReportStore) -> Self {
        let time_limit = Duration::from_secs(settings.timeout_minutes.max(1).saturating_mul(60));
        Self {
            settings,
            contexts,
            reports,
            time_limit,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    async fn spawn_and_wait(&self, task: &Task, args: &[String], limit: Duration, started: Instant) -> Attempt {
        let mut cmd = tokio::process::Command::new(&self.settings.command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &task.project_dir {
            let dir = expand(dir);
            if !dir.is_dir() {
                return Attempt::failed(format!("project directory {} does not exist", dir.display()), started);
            }
            cmd.current_dir(dir);
        }

        let output = match timeout(limit, cmd.output()).await {
            Err(_) => {
                let minutes = (limit.as_secs_f64() / 60.0 * 100.0).round() / 100.0;
                return Attempt::failed(format!("timed out after {minutes} minutes"), started);
            }
            Ok(Err(e)) => {
                return Attempt::failed(format!("failed to spawn {}: {e}", self.settings.command), started);
            }
            Ok(Ok(out)) => out,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let result = interpret_output(output.status.code(), &stdout, &stderr, elapsed_ms(started));
        Attempt { result, stdout, stderr }
    }

    fn report(&self, task: &Task, attempt: &Attempt, started_at: DateTime<Utc>, args_len: usize) -> Value {
        let r = &attempt.result;
        let stdout_tail = if r.success {
            String::new()
        } else {
            tail(&attempt.stdout, OUTPUT_TAIL_CHARS)
        };
        json!({
            "taskId": task.id,
            "taskName": task.name,
            "startedAt": started_at,
            "finishedAt": Utc::now(),
            "durationMs": r.duration_ms,
            "success": r.success,
            "costUSD": r.cost_usd,
            "exitCode": r.exit_code,
            "error": r.error,
            "argCount": args_len,
            "output": r.raw_output,
            "stdoutTail": stdout_tail,
            "stderrTail": tail(&attempt.stderr, OUTPUT_TAIL_CHARS),
        })
    }

    fn persist(&self, task: &Task, attempt: &Attempt, started_at: DateTime<Utc>, args_len: usize) {
        let r = &attempt.result;
        let report = self.report(task, attempt, started_at, args_len);
        match self.reports.write(&task.id, r.success, &report) {
            Ok(path) => info!(task_id = %task.id, path = %path.display(), "report written"),
            Err(e) => warn!(task_id = %task.id, error = ?e, "failed to write report"),
        }

        let max = self.settings.context_max_chars;
        let context = if r.success {
            success_context(&result_text(&r.raw_output, &attempt.stdout), max)
        } else {
            failure_context(r.error.as_deref().unwrap_or("unknown error"), max)
        };
        if let Err(e) = self.contexts.save(&task.id, &context) {
            warn!(task_id = %task.id, error = ?e, "failed to write run context");
        }
    }
}

#[async_trait]
impl TaskExecutor for CliExecutor {
    async fn run(&self, task: &Task, budget: Option<f64>) -> ExecutionResult {
        let started = Instant::now();
        let started_at = Utc::now();

        let context = self.contexts.load(&task.id).unwrap_or_else(|e| {
            warn!(task_id = %task.id, error = ?e, "run context unreadable; starting fresh");
            String::new()
        });
        let prompt = compose_prompt(&context, &task.prompt);
        let effective = EffectiveSettings::resolve(task, &self.settings, budget);
        let args = effective.args(&self.settings.command_args, &prompt);

        let guard = match (&task.project_dir, &effective.allowed_tools, effective.yolo) {
            (Some(dir), Some(tools), false) => {
                let dir: PathBuf = expand(dir);
                match PermissionsGuard::acquire(&dir, &tools.entries()) {
                    Ok(g) => Some(g),
                    Err(e) => {
                        warn!(task_id = %task.id, error = ?e, "could not write project permissions");
                        None
                    }
                }
            }
            _ => None,
        };

        info!(
            task_id = %task.id,
            model = effective.model.as_deref().unwrap_or("default"),
            max_budget_usd = ?effective.max_budget_usd,
            has_context = !context.trim().is_empty(),
            "starting task"
        );
        let attempt = self.spawn_and_wait(task, &args, self.time_limit, started).await;
        drop(guard);

        self.persist(task, &attempt, started_at, args.len());
        info!(
            task_id = %task.id,
            success = attempt.result.success,
            duration_ms = attempt.result.duration_ms,
            cost_usd = ?attempt.result.cost_usd,
            "task finished"
        );
        attempt.result
    }
}
