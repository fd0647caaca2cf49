use std::path::PathBuf;

use serde_json::Value;

use crate::TelemetryError;

/// Environment variable that overrides the credentials file.
pub const TOKEN_ENV_VAR: &str = "SURPLUS_OAUTH_TOKEN";

/// Where the probe's OAuth token comes from. Read on every fetch so a token
/// refreshed by another tool is picked up without restarting.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub path: PathBuf,
    pub env_var: Option<String>,
}

impl Credentials {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            env_var: Some(TOKEN_ENV_VAR.to_string()),
        }
    }

    pub fn access_token(&self) -> Result<String, TelemetryError> {
        if let Some(var) = &self.env_var {
            if let Ok(token) = std::env::var(var) {
                if !token.trim().is_empty() {
                    return Ok(token.trim().to_string());
                }
            }
        }

        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            TelemetryError::Credentials(format!("read {}: {e}", self.path.display()))
        })?;
        token_from_json(&text)
    }
}

/// Extracts `claudeAiOauth.accessToken` from a credentials document.
pub fn token_from_json(text: &str) -> Result<String, TelemetryError> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| TelemetryError::Credentials(format!("credentials file is not JSON: {e}")))?;
    doc.pointer("/claudeAiOauth/accessToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TelemetryError::Credentials("no claudeAiOauth.accessToken in credentials file".into()))
}
