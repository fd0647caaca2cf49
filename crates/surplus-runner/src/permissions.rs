use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{debug, warn};

const SETTINGS_DIR: &str = ".claude";
const SETTINGS_FILE: &str = "settings.local.json";

/// Scoped tool permissions for one execution.
///
/// `acquire` writes `<project>/.claude/settings.local.json` allowing the given
/// tools, keeping whatever was there before. Dropping the guard puts the
/// project back: the previous file is restored, or the written file (and a
/// directory created for it) is removed.
#[derive(Debug)]
pub struct PermissionsGuard {
    path: PathBuf,
    backup: Option<Vec<u8>>,
    created_dir: Option<PathBuf>,
    written: bool,
}

impl PermissionsGuard {
    /// Fails without touching anything when `project_dir` is not an existing
    /// directory.
    pub fn acquire(project_dir: &Path, allow: &[String]) -> Result<Self> {
        if !project_dir.is_dir() {
            bail!("project directory {} does not exist", project_dir.display());
        }
        let dir = project_dir.join(SETTINGS_DIR);
        let path = dir.join(SETTINGS_FILE);

        let created_dir = if dir.is_dir() {
            None
        } else {
            std::fs::create_dir(&dir).with_context(|| format!("create {}", dir.display()))?;
            Some(dir)
        };

        // From here on, drop undoes whatever has been done.
        let mut guard = Self {
            path,
            backup: None,
            created_dir,
            written: false,
        };

        guard.backup = match std::fs::read(&guard.path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e).with_context(|| format!("read {}", guard.path.display())),
        };

        let doc = json!({ "permissions": { "allow": allow } });
        let bytes = serde_json::to_vec_pretty(&doc)?;
        guard.written = true;
        std::fs::write(&guard.path, bytes).with_context(|| format!("write {}", guard.path.display()))?;
        debug!(path = %guard.path.display(), tools = allow.len(), "permissions written");
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn restore(&mut self) -> std::io::Result<()> {
        if std::mem::take(&mut self.written) {
            match self.backup.take() {
                Some(bytes) => std::fs::write(&self.path, bytes)?,
                None => match std::fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                },
            }
        }
        if let Some(dir) = self.created_dir.take() {
            // only if nothing else landed there meanwhile
            let _ = std::fs::remove_dir(dir);
        }
        Ok(())
    }
}

impl Drop for PermissionsGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(path = %self.path.display(), error = %e, "failed to restore project permissions");
        }
    }
}
