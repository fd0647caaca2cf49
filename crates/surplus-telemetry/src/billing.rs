//! Billing-block telemetry from an external usage CLI.
//!
//! Two invocations per fetch:
//! - `<cmd> blocks --active --json` for the active block,
//! - `<cmd> daily --json --since YYYYMMDD` for spend since the week started.
//!
//! Field probing is explicit: each figure has an ordered list of known field
//! paths and the first one present wins.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use serde_json::Value;
use surplus_core::{BillingBlock, BillingSnapshot, TelemetryModel, UsageSnapshot, WeekStart};
use tokio::time::timeout;
use tracing::debug;

use crate::{clip, TelemetryError, UsageSource};

/// Paths tried, in order, for the active block's remaining minutes.
pub const REMAINING_MINUTES_FIELDS: &[&[&str]] = &[&["projection", "remainingMinutes"], &["remainingMinutes"]];

/// Paths tried, in order, for the active block's cost.
pub const BLOCK_COST_FIELDS: &[&[&str]] = &[&["costUSD"], &["totalCost"], &["cost"]];

/// Paths tried, in order, for the aggregate in a daily report.
pub const WEEKLY_TOTAL_FIELDS: &[&[&str]] = &[&["totals", "totalCost"], &["totals", "costUSD"]];

/// Paths tried, in order, for one day's cost when there is no aggregate.
pub const DAY_COST_FIELDS: &[&[&str]] = &[&["totalCost"], &["costUSD"], &["cost"]];

pub struct BillingCommandSource {
    program: String,
    timeout: Duration,
    week_start: WeekStart,
}

impl BillingCommandSource {
    pub fn new(program: impl Into<String>, timeout: Duration, week_start: WeekStart) -> Self {
        Self {
            program: program.into(),
            timeout,
            week_start,
        }
    }

    async fn run_json(&self, args: &[&str]) -> Result<Value, TelemetryError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, ?args, "querying usage");
        let out = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TelemetryError::Timeout(self.timeout))?
            .map_err(|source| TelemetryError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !out.status.success() {
            return Err(TelemetryError::Exit {
                program: self.program.clone(),
                code: out.status.code(),
                stderr: clip(&String::from_utf8_lossy(&out.stderr), 500),
            });
        }

        serde_json::from_slice(&out.stdout).map_err(|e| {
            TelemetryError::Malformed(format!("{} {}: {e}", self.program, args.join(" ")))
        })
    }
}

#[async_trait]
impl UsageSource for BillingCommandSource {
    fn model(&self) -> TelemetryModel {
        TelemetryModel::Billing
    }

    async fn fetch(&self) -> Result<UsageSnapshot, TelemetryError> {
        let blocks = self.run_json(&["blocks", "--active", "--json"]).await?;
        let active_block = active_block(&blocks)?;

        let since = week_start_date(Local::now().date_naive(), self.week_start);
        let since_arg = since.format("%Y%m%d").to_string();
        let daily = self.run_json(&["daily", "--json", "--since", &since_arg]).await?;
        let weekly_cost = weekly_cost(&daily)?;

        Ok(UsageSnapshot::Billing(BillingSnapshot {
            active_block,
            weekly_cost,
        }))
    }
}

/// Most recent occurrence of the week's first day, today included.
pub fn week_start_date(today: NaiveDate, start: WeekStart) -> NaiveDate {
    let today_idx = today.weekday().num_days_from_monday();
    let start_idx = start.0.num_days_from_monday();
    let back = (today_idx + 7 - start_idx) % 7;
    today - chrono::Duration::days(i64::from(back))
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

/// First numeric value found along `paths`.
pub fn probe_f64(value: &Value, paths: &[&[&str]]) -> Option<f64> {
    paths.iter().find_map(|p| lookup(value, p).and_then(Value::as_f64))
}

/// Accepts `{"blocks": [...]}` or a bare array.
fn as_list<'a>(doc: &'a Value, key: &str) -> Result<&'a Vec<Value>, TelemetryError> {
    match doc {
        Value::Array(items) => Ok(items),
        Value::Object(map) => match map.get(key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(TelemetryError::Malformed(format!("expected `{key}` array"))),
        },
        _ => Err(TelemetryError::Malformed(format!("expected object or array holding `{key}`"))),
    }
}

/// The active block, if any. A lone block without an `isActive` flag counts
/// as active (the command was already asked for active blocks only).
pub fn active_block(doc: &Value) -> Result<Option<BillingBlock>, TelemetryError> {
    let blocks = as_list(doc, "blocks")?;
    let flagged = blocks
        .iter()
        .find(|b| b.get("isActive").and_then(Value::as_bool) == Some(true));
    let active = match flagged {
        Some(b) => Some(b),
        None if blocks.len() == 1 && blocks[0].get("isActive").is_none() => blocks.first(),
        None => None,
    };
    let Some(block) = active else {
        return Ok(None);
    };

    let remaining_minutes = probe_f64(block, REMAINING_MINUTES_FIELDS)
        .ok_or_else(|| TelemetryError::Malformed("active block has no remaining minutes".into()))?;
    let total_cost = probe_f64(block, BLOCK_COST_FIELDS)
        .ok_or_else(|| TelemetryError::Malformed("active block has no cost".into()))?;

    Ok(Some(BillingBlock {
        remaining_minutes,
        total_cost,
    }))
}

/// Spend over the reported days: the report's aggregate when present,
/// otherwise the sum of its days.
pub fn weekly_cost(doc: &Value) -> Result<f64, TelemetryError> {
    if let Some(total) = probe_f64(doc, WEEKLY_TOTAL_FIELDS) {
        return Ok(total);
    }
    let days = as_list(doc, "daily")?;
    Ok(days.iter().filter_map(|d| probe_f64(d, DAY_COST_FIELDS)).sum())
}
