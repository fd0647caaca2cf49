use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;
use ulid::Ulid;

use crate::fs::{sanitize_component, write_json_atomic};

/// Execution reports: one JSON file per run, never overwritten.
///
/// Files are named `<taskId>-<ulid>.json`, or `<taskId>-<ulid>.error.json`
/// for failed runs. ULIDs sort by creation time.
#[derive(Clone, Debug)]
pub struct ReportStore {
    pub dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, task_id: &str, success: bool, report: &Value) -> Result<PathBuf> {
        let suffix = if success { "json" } else { "error.json" };
        let name = format!("{}-{}.{suffix}", sanitize_component(task_id), Ulid::new());
        let path = self.dir.join(name);
        write_json_atomic(&path, report)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_reports_by_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("reports"));

        let ok = store.write("t1", true, &json!({"result": "fine"})).unwrap();
        let bad = store.write("t1", false, &json!({"error": "boom"})).unwrap();

        let ok_name = ok.file_name().unwrap().to_string_lossy().into_owned();
        let bad_name = bad.file_name().unwrap().to_string_lossy().into_owned();
        assert!(ok_name.starts_with("t1-") && ok_name.ends_with(".json") && !ok_name.ends_with(".error.json"));
        assert!(bad_name.starts_with("t1-") && bad_name.ends_with(".error.json"));

        let back: Value = serde_json::from_str(&std::fs::read_to_string(&bad).unwrap()).unwrap();
        assert_eq!(back["error"], "boom");
    }

    #[test]
    fn repeated_runs_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().to_path_buf());
        let a = store.write("t", true, &json!({})).unwrap();
        let b = store.write("t", true, &json!({})).unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
