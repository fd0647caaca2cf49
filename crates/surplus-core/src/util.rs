use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// Rounds a dollar amount to whole cents.
pub fn round_cents(usd: f64) -> f64 {
    (usd * 100.0).round() / 100.0
}
