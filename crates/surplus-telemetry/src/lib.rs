#![forbid(unsafe_code)]

//! Usage telemetry adapters.
//!
//! Each source queries something external and normalizes the answer into a
//! [`UsageSnapshot`]. A fetch either yields a complete snapshot or a
//! [`TelemetryError`]; there are no partial results.

use std::time::Duration;

use async_trait::async_trait;
use surplus_core::{TelemetryModel, UsageSnapshot};
use thiserror::Error;

pub mod billing;
pub mod credentials;
pub mod probe;

pub use billing::BillingCommandSource;
pub use credentials::Credentials;
pub use probe::RateLimitProbe;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("telemetry fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("usage probe returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("usage probe request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("malformed telemetry payload: {0}")]
    Malformed(String),
}

/// Something that can report current usage.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Model the snapshots are reported in.
    fn model(&self) -> TelemetryModel;

    /// One bounded fetch.
    async fn fetch(&self) -> Result<UsageSnapshot, TelemetryError>;
}

/// Fetches within `limit` and folds failures into `None`, logging them. The
/// evaluator treats an absent snapshot as an unconditional skip.
pub async fn fetch_or_log(source: &dyn UsageSource, limit: Duration) -> Option<UsageSnapshot> {
    let result = match tokio::time::timeout(limit, source.fetch()).await {
        Ok(r) => r,
        Err(_) => Err(TelemetryError::Timeout(limit)),
    };
    match result {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(model = %source.model(), error = %e, "usage telemetry fetch failed");
            None
        }
    }
}

pub(crate) fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}
