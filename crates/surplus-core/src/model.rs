use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Priority assigned to tasks that do not carry one.
pub const DEFAULT_PRIORITY: i64 = 999;

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

/// Lifecycle status of a queued task.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Parked; never selected.
    #[default]
    Off,
    /// Eligible for selection.
    On,
    /// Handed to the executor. Persisted before the child process starts.
    Running,
    /// Finished successfully and does not repeat.
    Done,
    /// Last attempt failed.
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Off => "off",
            TaskStatus::On => "on",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool allow-list as written in the queue or config file.
///
/// Both a single comma separated string and a JSON array are accepted and
/// written back in the form they were read.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AllowedTools {
    Joined(String),
    List(Vec<String>),
}

impl AllowedTools {
    /// Individual tool patterns.
    pub fn entries(&self) -> Vec<String> {
        match self {
            AllowedTools::Joined(s) => s
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            AllowedTools::List(items) => items
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Value passed to `--allowedTools`.
    pub fn to_arg(&self) -> String {
        self.entries().join(",")
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Queue entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable unique id. Also names the task's run-context and report files.
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Text sent to the executor.
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<AllowedTools>,
    #[serde(default, rename = "maxBudgetUSD", skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yolo: Option<bool>,

    /// Keys this program does not interpret; kept so a rewrite loses nothing.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Minimal task, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: prompt.into(),
            project_dir: None,
            status: TaskStatus::Off,
            priority: DEFAULT_PRIORITY,
            model: None,
            allowed_tools: None,
            max_budget_usd: None,
            repeat: false,
            yolo: None,
            extra: Map::new(),
        }
    }

    /// Name for display, falling back to the id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// The task queue document: `{"tasks": [...]}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskQueue {
    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskQueue {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            extra: Map::new(),
        }
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }
}

/// Outcome of one executor invocation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(rename = "costUSD")]
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Parsed structured output, or `{"result": "<raw text>"}` when the
    /// output was not JSON.
    pub raw_output: Value,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// Failed attempt that never produced output (spawn error and similar).
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            cost_usd: None,
            duration_ms,
            error: Some(error.into()),
            raw_output: Value::Null,
            exit_code: None,
        }
    }
}

/// Append-only history entry, one per executed cycle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub task_name: String,
    pub success: bool,
    #[serde(rename = "costUSD")]
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn from_result(task: &Task, result: &ExecutionResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            success: result.success,
            cost_usd: result.cost_usd,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
        }
    }
}
