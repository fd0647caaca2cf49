use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Which telemetry model a source reports in.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TelemetryModel {
    /// Utilization per rolling rate-limit window.
    #[default]
    RateLimit,
    /// Remaining minutes and cost of the active billing block plus weekly spend.
    Billing,
}

impl fmt::Display for TelemetryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryModel::RateLimit => f.write_str("rate-limit"),
            TelemetryModel::Billing => f.write_str("billing"),
        }
    }
}

/// Status value a window reports while requests are still accepted.
pub const WINDOW_ALLOWED: &str = "allowed";

/// One rate-limit window.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageWindow {
    /// Fraction of the window's quota consumed, 0..1.
    pub utilization: f64,
    pub status: String,
    /// Epoch seconds at which the window resets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<i64>,
}

impl UsageWindow {
    pub fn is_allowed(&self) -> bool {
        self.status == WINDOW_ALLOWED
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowMeta {
    /// Window the source designates as the bottleneck, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representative_claim: Option<String>,
}

/// Rate-limit-window snapshot. Window order is the order the source reported them.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    #[serde(default)]
    pub windows: IndexMap<String, UsageWindow>,
    #[serde(default)]
    pub meta: WindowMeta,
    /// The probe itself was rejected with a rate-limit response.
    #[serde(default)]
    pub rate_limited: bool,
}

impl WindowSnapshot {
    /// Binding window: the source's designation when it names a reported
    /// window, otherwise the window with the highest utilization (first wins
    /// on ties).
    pub fn binding_window(&self) -> Option<(&str, &UsageWindow)> {
        if let Some(claim) = self.meta.representative_claim.as_deref() {
            if let Some((name, w)) = self.windows.get_key_value(claim) {
                return Some((name.as_str(), w));
            }
        }
        let mut best: Option<(&str, &UsageWindow)> = None;
        for (name, w) in &self.windows {
            match best {
                Some((_, b)) if b.utilization >= w.utilization => {}
                _ => best = Some((name.as_str(), w)),
            }
        }
        best
    }
}

/// Active billing block.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BillingBlock {
    pub remaining_minutes: f64,
    pub total_cost: f64,
}

/// Billing-block snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BillingSnapshot {
    /// `None` when the source reports no active block.
    #[serde(default)]
    pub active_block: Option<BillingBlock>,
    /// Spend since the start of the configured week.
    #[serde(default)]
    pub weekly_cost: f64,
}

/// Normalized telemetry. A snapshot only exists when the fetch succeeded;
/// failed fetches are represented by its absence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "model", rename_all = "camelCase")]
pub enum UsageSnapshot {
    RateLimit(WindowSnapshot),
    Billing(BillingSnapshot),
}

impl UsageSnapshot {
    pub fn model(&self) -> TelemetryModel {
        match self {
            UsageSnapshot::RateLimit(_) => TelemetryModel::RateLimit,
            UsageSnapshot::Billing(_) => TelemetryModel::Billing,
        }
    }
}
