//! Run/skip evaluation.
//!
//! [`evaluate`] is a pure function of a usage snapshot and the configured
//! thresholds. Checks run in a fixed order and the first failing one decides.
//! Every reason string carries the numbers that were compared.

use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::usage::{BillingSnapshot, UsageSnapshot, WindowSnapshot};
use crate::util::round_cents;

/// Verdict of one evaluation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub should_run: bool,
    pub reason: String,
    /// Spend ceiling for the next task. Only the billing model produces one.
    pub available_budget: Option<f64>,
    pub binding_window: Option<String>,
    pub utilization: Option<f64>,
}

impl Decision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_run: false,
            reason: reason.into(),
            available_budget: None,
            binding_window: None,
            utilization: None,
        }
    }

    fn with_budget(mut self, budget: f64) -> Self {
        self.available_budget = Some(budget);
        self
    }

    fn with_window(mut self, name: &str, utilization: f64) -> Self {
        self.binding_window = Some(name.to_string());
        self.utilization = Some(utilization);
        self
    }
}

/// First day of the spending week.
///
/// Accepts a day name (`"monday"`, `"Mon"`) or an index where 0 is Sunday.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekStart(pub Weekday);

impl Default for WeekStart {
    fn default() -> Self {
        Self(Weekday::Mon)
    }
}

impl WeekStart {
    pub fn from_index(index: u64) -> Option<Self> {
        let day = match index {
            0 => Weekday::Sun,
            1 => Weekday::Mon,
            2 => Weekday::Tue,
            3 => Weekday::Wed,
            4 => Weekday::Thu,
            5 => Weekday::Fri,
            6 => Weekday::Sat,
            _ => return None,
        };
        Some(Self(day))
    }
}

impl fmt::Display for WeekStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
            Weekday::Sat => "saturday",
            Weekday::Sun => "sunday",
        };
        f.write_str(name)
    }
}

impl Serialize for WeekStart {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WeekStart {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(i) => WeekStart::from_index(i)
                .ok_or_else(|| serde::de::Error::custom(format!("weekday index {i} out of range 0..=6"))),
            Raw::Name(name) => Weekday::from_str(name.trim())
                .map(WeekStart)
                .map_err(|_| serde::de::Error::custom(format!("unknown weekday {name:?}"))),
        }
    }
}

/// Threshold parameters for both telemetry models. Only the fields of the
/// active model are consulted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Thresholds {
    pub min_remaining_minutes: f64,
    #[serde(rename = "maxBlockCostUSD")]
    pub max_block_cost_usd: f64,
    #[serde(rename = "weeklyBudgetUSD")]
    pub weekly_budget_usd: f64,
    pub weekly_start_day: WeekStart,
    pub max_utilization: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_remaining_minutes: 30.0,
            max_block_cost_usd: 10.0,
            weekly_budget_usd: 100.0,
            weekly_start_day: WeekStart::default(),
            max_utilization: 0.8,
        }
    }
}

/// Decide whether to run, given the snapshot (absent when the fetch failed).
pub fn evaluate(snapshot: Option<&UsageSnapshot>, thresholds: &Thresholds) -> Decision {
    match snapshot {
        None => Decision::skip("usage telemetry unavailable (fetch failed); skipping this cycle"),
        Some(UsageSnapshot::Billing(b)) => evaluate_billing(b, thresholds),
        Some(UsageSnapshot::RateLimit(w)) => evaluate_windows(w, thresholds),
    }
}

/// Billing-block model.
pub fn evaluate_billing(snapshot: &BillingSnapshot, t: &Thresholds) -> Decision {
    let Some(block) = &snapshot.active_block else {
        return Decision::skip("no active billing block; available budget $0.00").with_budget(0.0);
    };

    if block.remaining_minutes < t.min_remaining_minutes {
        return Decision::skip(format!(
            "block has {:.0} min remaining < {:.0} min required",
            block.remaining_minutes, t.min_remaining_minutes
        ))
        .with_budget(0.0);
    }

    if block.total_cost > t.max_block_cost_usd {
        return Decision::skip(format!(
            "block cost ${:.2} > ${:.2} block cap (well-used)",
            block.total_cost, t.max_block_cost_usd
        ))
        .with_budget(0.0);
    }

    if snapshot.weekly_cost >= t.weekly_budget_usd {
        return Decision::skip(format!(
            "weekly cost ${:.2} >= ${:.2} weekly budget",
            snapshot.weekly_cost, t.weekly_budget_usd
        ))
        .with_budget(0.0);
    }

    let weekly_left = t.weekly_budget_usd - snapshot.weekly_cost;
    let block_left = t.max_block_cost_usd - block.total_cost;
    let available = round_cents(weekly_left.min(block_left));

    Decision {
        should_run: true,
        reason: format!(
            "block {:.0} min remaining >= {:.0} min, block cost ${:.2} <= ${:.2}, weekly cost ${:.2} < ${:.2}; available budget ${:.2}",
            block.remaining_minutes,
            t.min_remaining_minutes,
            block.total_cost,
            t.max_block_cost_usd,
            snapshot.weekly_cost,
            t.weekly_budget_usd,
            available
        ),
        available_budget: Some(available),
        binding_window: None,
        utilization: None,
    }
}

/// Rate-limit-window model. No budget is produced; tasks are bounded by their
/// own `maxBudgetUSD`.
pub fn evaluate_windows(snapshot: &WindowSnapshot, t: &Thresholds) -> Decision {
    if snapshot.rate_limited {
        return Decision::skip("usage probe was rate limited (HTTP 429); quota exhausted");
    }

    if snapshot.windows.is_empty() {
        return Decision::skip("usage probe reported 0 rate-limit windows");
    }

    if let Some((name, w)) = snapshot.windows.iter().find(|(_, w)| !w.is_allowed()) {
        return Decision::skip(format!(
            "window {name} status is {:?} (utilization {})",
            w.status,
            pct(w.utilization)
        ))
        .with_window(name, w.utilization);
    }

    let Some((name, w)) = snapshot.binding_window() else {
        return Decision::skip("usage probe reported 0 rate-limit windows");
    };

    if w.utilization >= t.max_utilization {
        return Decision::skip(format!(
            "binding window {name} utilization {} >= {} threshold (well-used)",
            pct(w.utilization),
            pct(t.max_utilization)
        ))
        .with_window(name, w.utilization);
    }

    Decision {
        should_run: true,
        reason: format!(
            "binding window {name} utilization {} < {} threshold",
            pct(w.utilization),
            pct(t.max_utilization)
        ),
        available_budget: None,
        binding_window: Some(name.to_string()),
        utilization: Some(w.utilization),
    }
}

fn pct(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{BillingBlock, UsageWindow};

    fn billing(remaining: f64, block_cost: f64, weekly: f64) -> BillingSnapshot {
        BillingSnapshot {
            active_block: Some(BillingBlock {
                remaining_minutes: remaining,
                total_cost: block_cost,
            }),
            weekly_cost: weekly,
        }
    }

    #[test]
    fn no_block_skips_with_zero_budget() {
        let d = evaluate_billing(&BillingSnapshot::default(), &Thresholds::default());
        assert!(!d.should_run);
        assert_eq!(d.available_budget, Some(0.0));
    }

    #[test]
    fn low_remaining_minutes_skips_first() {
        // cost checks would also fail, but remaining minutes is checked first
        let d = evaluate_billing(&billing(10.0, 50.0, 500.0), &Thresholds::default());
        assert!(!d.should_run);
        assert!(d.reason.contains("10 min remaining < 30 min"), "{}", d.reason);
    }

    #[test]
    fn block_cost_over_cap_skips() {
        let d = evaluate_billing(&billing(120.0, 10.5, 0.0), &Thresholds::default());
        assert!(!d.should_run);
        assert!(d.reason.contains("$10.50 > $10.00"), "{}", d.reason);
        assert!(d.reason.contains("well-used"));
    }

    #[test]
    fn weekly_budget_reached_skips() {
        let d = evaluate_billing(&billing(120.0, 1.0, 100.0), &Thresholds::default());
        assert!(!d.should_run);
        assert!(d.reason.contains("$100.00 >= $100.00"), "{}", d.reason);
    }

    #[test]
    fn budget_is_smaller_headroom_rounded() {
        let d = evaluate_billing(&billing(120.0, 2.333, 95.0), &Thresholds::default());
        assert!(d.should_run);
        assert_eq!(d.available_budget, Some(5.0));

        let d = evaluate_billing(&billing(120.0, 2.333, 10.0), &Thresholds::default());
        assert_eq!(d.available_budget, Some(7.67));
    }

    #[test]
    fn failed_fetch_skips() {
        let d = evaluate(None, &Thresholds::default());
        assert!(!d.should_run);
        assert!(d.available_budget.is_none());
    }

    #[test]
    fn rate_limited_probe_skips() {
        let snap = WindowSnapshot {
            rate_limited: true,
            ..WindowSnapshot::default()
        };
        let d = evaluate_windows(&snap, &Thresholds::default());
        assert!(!d.should_run);
        assert!(d.reason.contains("429"));
    }

    #[test]
    fn blocked_window_reported_by_name() {
        let mut snap = WindowSnapshot::default();
        snap.windows.insert(
            "5h".into(),
            UsageWindow { utilization: 0.1, status: "allowed".into(), reset_at: None },
        );
        snap.windows.insert(
            "7d".into(),
            UsageWindow { utilization: 1.0, status: "rejected".into(), reset_at: Some(1) },
        );
        let d = evaluate_windows(&snap, &Thresholds::default());
        assert!(!d.should_run);
        assert_eq!(d.binding_window.as_deref(), Some("7d"));
        assert_eq!(d.utilization, Some(1.0));
        assert!(d.reason.contains("100.0%"), "{}", d.reason);
    }

    #[test]
    fn week_start_accepts_names_and_indices() {
        let w: WeekStart = serde_json::from_str(r#""Friday""#).unwrap();
        assert_eq!(w.0, Weekday::Fri);
        let w: WeekStart = serde_json::from_str("0").unwrap();
        assert_eq!(w.0, Weekday::Sun);
        assert!(serde_json::from_str::<WeekStart>("9").is_err());
        assert_eq!(serde_json::to_string(&WeekStart::default()).unwrap(), r#""monday""#);
    }

    #[test]
    fn thresholds_merge_key_by_key() {
        let t: Thresholds = serde_json::from_str(r#"{"maxUtilization":0.5}"#).unwrap();
        assert_eq!(t.max_utilization, 0.5);
        assert_eq!(t.min_remaining_minutes, 30.0);
        assert_eq!(t.weekly_budget_usd, 100.0);
    }
}
