use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use surplus_core::HistoryRecord;
use tracing::warn;

use crate::fs::{read_optional, write_json_atomic};

/// Append-only run history: a JSON array of [`HistoryRecord`].
#[derive(Clone, Debug)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_raw(&self) -> Result<Vec<Value>> {
        let Some(text) = read_optional(&self.path)? else {
            return Ok(vec![]);
        };
        if text.trim().is_empty() {
            return Ok(vec![]);
        }
        let doc: Value = serde_json::from_str(&text)
            .with_context(|| format!("parse history {}", self.path.display()))?;
        match doc {
            Value::Array(items) => Ok(items),
            _ => bail!("history {} is not a JSON array", self.path.display()),
        }
    }

    /// Appends one record. Past entries are written back exactly as read; an
    /// unreadable file is reported and left alone rather than replaced.
    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        let mut items = self.load_raw()?;
        items.push(serde_json::to_value(record)?);
        write_json_atomic(&self.path, &items)
    }

    /// The last `n` records, oldest first. Entries that do not parse are skipped.
    pub fn recent(&self, n: usize) -> Result<Vec<HistoryRecord>> {
        let items = self.load_raw()?;
        let start = items.len().saturating_sub(n);
        Ok(items[start..]
            .iter()
            .filter_map(|v| match serde_json::from_value(v.clone()) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable history entry");
                    None
                }
            })
            .collect())
    }
}
