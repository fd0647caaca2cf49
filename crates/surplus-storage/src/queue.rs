use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use surplus_core::{apply_event, transition, LifecycleEvent, TaskQueue, TaskStatus};
use tracing::{error, warn};

use crate::fs::{read_optional, write_json_atomic};

/// The task queue document on disk. Every mutation rewrites the whole file.
#[derive(Clone, Debug)]
pub struct QueueFile {
    path: PathBuf,
}

impl QueueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the queue. A missing file is an empty queue; a malformed one is
    /// an error.
    pub fn load(&self) -> Result<TaskQueue> {
        let Some(text) = read_optional(&self.path)? else {
            return Ok(TaskQueue::default());
        };
        if text.trim().is_empty() {
            return Ok(TaskQueue::default());
        }
        serde_json::from_str(&text).with_context(|| format!("parse task queue {}", self.path.display()))
    }

    /// Like [`load`](Self::load), but logs a malformed file and substitutes an
    /// empty queue.
    pub fn load_or_empty(&self) -> TaskQueue {
        match self.load() {
            Ok(q) => q,
            Err(e) => {
                error!(path = %self.path.display(), error = ?e, "task queue unreadable; using empty queue");
                TaskQueue::default()
            }
        }
    }

    pub fn save(&self, queue: &TaskQueue) -> Result<()> {
        write_json_atomic(&self.path, queue)
    }

    /// Re-reads the file, sets the task's status and writes it back, so edits
    /// made to the file since the cycle started are kept. Returns `false`
    /// without writing when the task is no longer in the file.
    pub fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<bool> {
        let mut queue = self.load()?;
        if !transition(&mut queue, task_id, status) {
            warn!(task_id, %status, "task vanished from queue file; status not recorded");
            return Ok(false);
        }
        self.save(&queue)?;
        Ok(true)
    }

    /// Applies an operator event (enable, reset) with the transition table
    /// enforced. `Ok(None)` when the id is unknown.
    pub fn apply(&self, task_id: &str, event: LifecycleEvent) -> Result<Option<TaskStatus>> {
        let mut queue = self.load()?;
        let Some(status) = apply_event(&mut queue, task_id, event)? else {
            return Ok(None);
        };
        self.save(&queue)?;
        Ok(Some(status))
    }
}
