use std::path::{Path, PathBuf};

use anyhow::Result;
use surplus_core::{truncate_tail, DEFAULT_CONTEXT_MAX_CHARS};

use crate::fs::{read_optional, sanitize_component, write_atomic};

/// Per-task run contexts, one markdown file per task id.
#[derive(Clone, Debug)]
pub struct RunContextStore {
    pub dir: PathBuf,
    pub max_chars: usize,
}

impl RunContextStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            max_chars: DEFAULT_CONTEXT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", sanitize_component(task_id)))
    }

    /// Stored context, empty when the task has never run.
    pub fn load(&self, task_id: &str) -> Result<String> {
        Ok(read_optional(&self.path_for(task_id))?.unwrap_or_default())
    }

    /// Replaces the task's context, bounded to `max_chars`.
    pub fn save(&self, task_id: &str, content: &str) -> Result<PathBuf> {
        let path = self.path_for(task_id);
        write_atomic(&path, truncate_tail(content, self.max_chars).as_bytes())?;
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
