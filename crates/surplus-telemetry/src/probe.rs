//! Rate-limit-window telemetry from a minimal authenticated API request.
//!
//! The request asks for a single output token; only the response headers
//! matter. Window headers look like
//! `anthropic-ratelimit-unified-<window>-{utilization,status,reset}` and the
//! bottleneck designation is `anthropic-ratelimit-unified-representative-claim`.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{Client, StatusCode};
use serde_json::json;
use surplus_core::{TelemetryModel, UsageSnapshot, UsageWindow, WindowMeta, WindowSnapshot, WINDOW_ALLOWED};
use tracing::debug;

use crate::{clip, Credentials, TelemetryError, UsageSource};

const HEADER_PREFIX: &str = "anthropic-ratelimit-unified-";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";

pub struct RateLimitProbe {
    client: Client,
    api_url: String,
    model: String,
    credentials: Credentials,
    timeout: Duration,
}

impl RateLimitProbe {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            model: model.into(),
            credentials,
            timeout,
        }
    }
}

#[async_trait]
impl UsageSource for RateLimitProbe {
    fn model(&self) -> TelemetryModel {
        TelemetryModel::RateLimit
    }

    async fn fetch(&self) -> Result<UsageSnapshot, TelemetryError> {
        let token = self.credentials.access_token()?;
        let body = json!({
            "model": self.model,
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "."}],
        });

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(token)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", OAUTH_BETA)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TelemetryError::Timeout(self.timeout)
                } else {
                    TelemetryError::Request(e)
                }
            })?;

        let status = resp.status();
        let mut snapshot = windows_from_headers(
            resp.headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        );
        debug!(%status, windows = snapshot.windows.len(), "usage probe answered");

        if status == StatusCode::TOO_MANY_REQUESTS {
            snapshot.rate_limited = true;
            return Ok(UsageSnapshot::RateLimit(snapshot));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TelemetryError::Http {
                status: status.as_u16(),
                body: clip(&text, 300),
            });
        }

        Ok(UsageSnapshot::RateLimit(snapshot))
    }
}

#[derive(Default)]
struct PartialWindow {
    utilization: Option<f64>,
    status: Option<String>,
    reset_at: Option<i64>,
}

/// Builds a window snapshot from response headers, keeping header order.
///
/// Only windows that report a utilization are kept. A window without its own
/// status inherits the overall unified status, and failing that is allowed.
pub fn windows_from_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> WindowSnapshot {
    let mut partial: IndexMap<String, PartialWindow> = IndexMap::new();
    let mut overall_status: Option<String> = None;
    let mut claim: Option<String> = None;

    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let Some(rest) = name.strip_prefix(HEADER_PREFIX) else {
            continue;
        };
        let value = value.trim();
        match rest {
            "representative-claim" => claim = Some(value.to_string()),
            "status" => overall_status = Some(value.to_string()),
            _ => {
                if let Some(window) = rest.strip_suffix("-utilization") {
                    partial.entry(window.to_string()).or_default().utilization = parse_utilization(value);
                } else if let Some(window) = rest.strip_suffix("-status") {
                    partial.entry(window.to_string()).or_default().status = Some(value.to_string());
                } else if let Some(window) = rest.strip_suffix("-reset") {
                    partial.entry(window.to_string()).or_default().reset_at = value.parse().ok();
                }
            }
        }
    }

    let windows: IndexMap<String, UsageWindow> = partial
        .into_iter()
        .filter_map(|(name, p)| {
            let utilization = p.utilization?;
            let status = p
                .status
                .or_else(|| overall_status.clone())
                .unwrap_or_else(|| WINDOW_ALLOWED.to_string());
            Some((
                name,
                UsageWindow {
                    utilization,
                    status,
                    reset_at: p.reset_at,
                },
            ))
        })
        .collect();

    let representative_claim = claim.map(|c| canonical_window_name(&c, &windows));

    WindowSnapshot {
        windows,
        meta: WindowMeta { representative_claim },
        rate_limited: false,
    }
}

/// Utilization as a 0..1 fraction. Values above 2 are read as percentages;
/// anything in between is an over-quota fraction and counts as full.
fn parse_utilization(value: &str) -> Option<f64> {
    let v: f64 = value.parse().ok()?;
    if !v.is_finite() || v < 0.0 {
        return None;
    }
    Some(if v > PERCENT_FLOOR { v / 100.0 } else { v.min(1.0) })
}

const PERCENT_FLOOR: f64 = 2.0;

/// The designation may use long names (`five_hour`) while window headers use
/// short ones (`5h`). Maps to the reported window name when one matches.
fn canonical_window_name(claim: &str, windows: &IndexMap<String, UsageWindow>) -> String {
    if windows.contains_key(claim) {
        return claim.to_string();
    }
    let short = claim
        .replace("seven_day", "7d")
        .replace("five_hour", "5h")
        .replace('-', "_");
    if windows.contains_key(&short) {
        short
    } else {
        claim.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unified_headers_in_order() {
        let headers = [
            ("content-type", "application/json"),
            ("anthropic-ratelimit-unified-status", "allowed"),
            ("anthropic-ratelimit-unified-5h-utilization", "0.42"),
            ("anthropic-ratelimit-unified-5h-status", "allowed"),
            ("anthropic-ratelimit-unified-5h-reset", "1760000000"),
            ("anthropic-ratelimit-unified-7d-utilization", "0.91"),
            ("anthropic-ratelimit-unified-7d-status", "allowed_warning"),
            ("anthropic-ratelimit-unified-representative-claim", "five_hour"),
            ("anthropic-ratelimit-unified-overage-status", "rejected"),
        ];
        let snap = windows_from_headers(headers);
        let names: Vec<&str> = snap.windows.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["5h", "7d"]);
        assert_eq!(snap.windows["5h"].utilization, 0.42);
        assert_eq!(snap.windows["5h"].reset_at, Some(1_760_000_000));
        assert_eq!(snap.windows["7d"].status, "allowed_warning");
        assert_eq!(snap.meta.representative_claim.as_deref(), Some("5h"));
    }

    #[test]
    fn window_inherits_overall_status() {
        let snap = windows_from_headers([
            ("anthropic-ratelimit-unified-status", "rejected"),
            ("anthropic-ratelimit-unified-7d-utilization", "1.0"),
        ]);
        assert_eq!(snap.windows["7d"].status, "rejected");
    }

    #[test]
    fn percentages_are_normalized() {
        let snap = windows_from_headers([("anthropic-ratelimit-unified-5h-utilization", "37")]);
        assert_eq!(snap.windows["5h"].utilization, 0.37);
        assert_eq!(snap.windows["5h"].status, "allowed");
    }

    #[test]
    fn over_quota_fraction_is_full() {
        let snap = windows_from_headers([
            ("anthropic-ratelimit-unified-5h-utilization", "1.05"),
            ("anthropic-ratelimit-unified-5h-status", "allowed"),
        ]);
        assert_eq!(snap.windows["5h"].utilization, 1.0);
    }

    #[test]
    fn no_unified_headers_means_no_windows() {
        let snap = windows_from_headers([("x-request-id", "abc")]);
        assert!(snap.windows.is_empty());
        assert!(snap.meta.representative_claim.is_none());
    }
}
