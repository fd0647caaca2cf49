use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use surplus_core::{is_quiet_hours_at, parse_hhmm, AllowedTools, TelemetryModel, Thresholds, DEFAULT_CONTEXT_MAX_CHARS};
use tracing::{debug, warn};

pub const DEFAULT_DATA_DIR: &str = "~/.surplus";
pub const CONFIG_FILE: &str = "config.json";

/// Settings file. Every section and every key is optional; a present section
/// overrides the defaults key by key and unknown keys are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub telemetry: TelemetryConfig,
    pub thresholds: Thresholds,
    pub watch: WatchConfig,
    pub execution: ExecutionConfig,
    pub paths: PathsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryConfig {
    pub source: TelemetryModel,
    /// Usage CLI for the billing model.
    pub command: String,
    pub timeout_seconds: u64,
    pub credentials_path: String,
    pub probe_model: String,
    pub api_url: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            source: TelemetryModel::RateLimit,
            command: "ccusage".to_string(),
            timeout_seconds: 30,
            credentials_path: "~/.claude/.credentials.json".to_string(),
            probe_model: "claude-haiku-4-5".to_string(),
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchConfig {
    pub interval_minutes: u64,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }
}

impl WatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1).saturating_mul(60))
    }

    pub fn is_quiet_at(&self, minute_of_day: u32) -> bool {
        is_quiet_hours_at(
            self.quiet_hours_start.as_deref(),
            self.quiet_hours_end.as_deref(),
            minute_of_day,
        )
    }

    /// Quiet-hours check against the local wall clock.
    pub fn is_quiet_now(&self) -> bool {
        let now = Local::now();
        self.is_quiet_at(now.hour() * 60 + now.minute())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub command: String,
    /// Arguments placed before the generated ones, for wrappers.
    pub command_args: Vec<String>,
    pub model: Option<String>,
    pub default_allowed_tools: Option<AllowedTools>,
    pub yolo: bool,
    pub timeout_minutes: u64,
    pub context_max_chars: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            command_args: vec![],
            model: None,
            default_allowed_tools: None,
            yolo: false,
            timeout_minutes: 30,
            context_max_chars: DEFAULT_CONTEXT_MAX_CHARS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PathsConfig {
    pub data_dir: String,
    pub queue: String,
    pub history: String,
    pub context_dir: String,
    pub reports_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            queue: "tasks.json".to_string(),
            history: "history.json".to_string(),
            context_dir: "context".to_string(),
            reports_dir: "reports".to_string(),
        }
    }
}

/// Resolved file locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub queue: PathBuf,
    pub history: PathBuf,
    pub context_dir: PathBuf,
    pub reports_dir: PathBuf,
}

pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl PathsConfig {
    /// Expands `~` and anchors relative entries under the data dir.
    pub fn resolve(&self) -> Paths {
        let data_dir = expand(&self.data_dir);
        let under = |p: &str| data_dir.join(expand(p));
        Paths {
            queue: under(&self.queue),
            history: under(&self.history),
            context_dir: under(&self.context_dir),
            reports_dir: under(&self.reports_dir),
            data_dir,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        expand(DEFAULT_DATA_DIR).join(CONFIG_FILE)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Missing file means defaults. A file that cannot be read or parsed is
    /// reported and defaults are used. Nothing is written.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(cfg) => {
                cfg.warn_on_suspicious();
                cfg
            }
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "config unreadable; using defaults");
                Self::default()
            }
        }
    }

    /// Problems that do not stop the program but change its behaviour.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = vec![];
        let start = self.watch.quiet_hours_start.as_deref();
        let end = self.watch.quiet_hours_end.as_deref();
        for (key, value) in [("quietHoursStart", start), ("quietHoursEnd", end)] {
            if let Some(v) = value {
                if parse_hhmm(v).is_none() {
                    out.push(format!("watch.{key} {v:?} is not HH:MM; quiet hours disabled"));
                }
            }
        }
        if start.is_some() != end.is_some() {
            out.push("only one quiet-hours bound set; quiet hours disabled".to_string());
        }
        if !(0.0..=1.0).contains(&self.thresholds.max_utilization) {
            out.push(format!(
                "thresholds.maxUtilization {} is outside 0..1",
                self.thresholds.max_utilization
            ));
        }
        out
    }

    fn warn_on_suspicious(&self) {
        for w in self.warnings() {
            warn!("{w}");
        }
    }
}
