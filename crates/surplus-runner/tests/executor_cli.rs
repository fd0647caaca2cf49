//! Drives `CliExecutor` against scripted stand-ins for the task CLI.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use surplus_core::{AllowedTools, Task, FAILURE_TAG, SUCCESS_TAG};
use surplus_runner::{CliExecutor, ExecutionConfig, TaskExecutor};
use surplus_storage::{ReportStore, RunContextStore};

struct Harness {
    dir: tempfile::TempDir,
    executor: CliExecutor,
}

impl Harness {
    /// `body` becomes a shell script run as `sh <script> <generated args>`.
    fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-cli.sh");
        std::fs::write(&script, body).unwrap();
        let settings = ExecutionConfig {
            command: "sh".into(),
            command_args: vec![script.display().to_string()],
            ..ExecutionConfig::default()
        };
        let executor = CliExecutor::new(
            settings,
            RunContextStore::new(dir.path().join("context")),
            ReportStore::new(dir.path().join("reports")),
        );
        Self { dir, executor }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn reports(&self) -> Vec<String> {
        match std::fs::read_dir(self.path("reports")) {
            Ok(rd) => rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect(),
            Err(_) => vec![],
        }
    }

    fn context(&self, task_id: &str) -> String {
        std::fs::read_to_string(self.path("context").join(format!("{task_id}.md"))).unwrap()
    }
}

fn project(root: &Path) -> PathBuf {
    let p = root.join("project");
    std::fs::create_dir_all(&p).unwrap();
    p
}

const RECORDING_SUCCESS: &str = r#"
out="$(dirname "$0")"
printf '%s\n' "$@" > "$out/args.txt"
pwd > "$out/cwd.txt"
if [ -f .claude/settings.local.json ]; then cp .claude/settings.local.json "$out/seen-settings.json"; fi
echo '{"type":"result","is_error":false,"result":"all tests pass","total_cost_usd":0.37}'
"#;

#[tokio::test]
async fn success_writes_report_context_and_restores_permissions() {
    let h = Harness::new(RECORDING_SUCCESS);
    let project = project(h.dir.path());
    let mut task = Task::new("t1", "Tests", "run the tests");
    task.project_dir = Some(project.display().to_string());
    task.allowed_tools = Some(AllowedTools::List(vec!["Read".into(), "Edit".into()]));

    let result = h.executor.run(&task, Some(4.0)).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.cost_usd, Some(0.37));
    assert_eq!(result.exit_code, Some(0));

    let args = std::fs::read_to_string(h.path("args.txt")).unwrap();
    assert!(args.starts_with("-p\nrun the tests\n--output-format\njson\n"), "{args}");
    assert!(args.contains("--allowedTools\nRead,Edit\n"));
    assert!(args.contains("--max-budget-usd\n4.00\n"));
    assert!(!args.contains("--dangerously-skip-permissions"));

    let cwd = std::fs::read_to_string(h.path("cwd.txt")).unwrap();
    assert_eq!(
        std::fs::canonicalize(cwd.trim()).unwrap(),
        std::fs::canonicalize(&project).unwrap()
    );

    let seen: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(h.path("seen-settings.json")).unwrap()).unwrap();
    assert_eq!(seen["permissions"]["allow"], serde_json::json!(["Read", "Edit"]));
    assert!(!project.join(".claude").exists());

    let reports = h.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].starts_with("t1-") && !reports[0].ends_with(".error.json"));

    let ctx = h.context("t1");
    assert!(ctx.starts_with(SUCCESS_TAG));
    assert!(ctx.contains("all tests pass"));

    // second run carries the context in front of the prompt
    let again = h.executor.run(&task, None).await;
    assert!(again.success);
    let args = std::fs::read_to_string(h.path("args.txt")).unwrap();
    assert!(args.contains(SUCCESS_TAG));
    assert!(args.contains("---\n\nrun the tests"));
    assert_eq!(h.reports().len(), 2);
}

#[tokio::test]
async fn nonzero_exit_is_failure_with_stderr() {
    let h = Harness::new("echo 'kaboom' >&2\nexit 4\n");
    let task = Task::new("t2", "Breaks", "p");

    let result = h.executor.run(&task, None).await;
    assert!(!result.success);
    assert_eq!(result.exit_code, Some(4));
    assert_eq!(result.error.as_deref(), Some("exit 4: kaboom"));

    let reports = h.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].ends_with(".error.json"));
    let ctx = h.context("t2");
    assert!(ctx.starts_with(FAILURE_TAG));
    assert!(ctx.contains("kaboom"));
}

#[tokio::test]
async fn plain_text_output_is_opaque_success() {
    let h = Harness::new("echo 'not json at all'\n");
    let result = h.executor.run(&Task::new("t3", "Text", "p"), None).await;
    assert!(result.success);
    assert_eq!(result.cost_usd, None);
    assert_eq!(result.raw_output["result"], "not json at all\n");
    assert!(h.context("t3").contains("not json at all"));
}

#[tokio::test]
async fn timeout_kills_child_and_cleans_up() {
    let Harness { dir, executor } = Harness::new("sleep 30\n");
    let h = Harness {
        dir,
        executor: executor.with_time_limit(Duration::from_millis(300)),
    };

    let project = project(h.dir.path());
    let mut task = Task::new("t4", "Slow", "p");
    task.project_dir = Some(project.display().to_string());
    task.allowed_tools = Some(AllowedTools::Joined("Read".into()));

    let started = Instant::now();
    let result = h.executor.run(&task, None).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").starts_with("timed out after"));
    assert!(!project.join(".claude").exists());
    assert!(h.reports()[0].ends_with(".error.json"));
    assert!(h.context("t4").starts_with(FAILURE_TAG));
}

#[tokio::test]
async fn missing_cli_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let executor = CliExecutor::new(
        ExecutionConfig {
            command: "surplus-no-such-task-cli".into(),
            ..ExecutionConfig::default()
        },
        RunContextStore::new(dir.path().join("context")),
        ReportStore::new(dir.path().join("reports")),
    );
    let result = executor.run(&Task::new("t5", "Nope", "p"), None).await;
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("failed to spawn surplus-no-such-task-cli"));
    assert!(dir.path().join("context").join("t5.md").exists());
}

#[tokio::test]
async fn missing_project_dir_fails_without_creating_it() {
    let h = Harness::new(RECORDING_SUCCESS);
    let typo = h.path("typo-project");
    let mut task = Task::new("t6", "Typo", "p");
    task.project_dir = Some(typo.display().to_string());
    task.allowed_tools = Some(AllowedTools::Joined("Read".into()));

    let result = h.executor.run(&task, None).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").contains("does not exist"), "{:?}", result.error);
    assert!(!typo.exists());
    assert!(!h.path("args.txt").exists());
    assert!(h.reports()[0].ends_with(".error.json"));
    assert!(h.context("t6").starts_with(FAILURE_TAG));
}
