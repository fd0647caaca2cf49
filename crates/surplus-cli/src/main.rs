use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use surplus_core::TaskStatus;
use surplus_runner::{expand, Config, CycleOutcome, Runner};

#[derive(Parser)]
#[command(name = "surplus", version, about = "Spend leftover subscription quota on queued tasks")]
struct Cli {
    /// Config file (default ~/.surplus/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Task queue file; overrides paths.queue
    #[arg(long, global = true)]
    queue: Option<PathBuf>,

    /// Data directory; overrides paths.dataDir
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (env-filter syntax). RUST_LOG wins when set.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Shorthand for --log debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single cycle (default)
    RunOnce,

    /// Run cycles on the configured interval until interrupted
    Watch,

    /// Show thresholds, the current decision, the queue and recent runs
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Evaluate and select without executing or writing anything
    DryRun,

    /// Turn a parked task on (off -> on)
    Enable { id: String },

    /// Put a finished, failed or stuck task back on (done/failed/running -> on)
    Reset { id: String },
}

fn init_tracing(level: &str, verbose: bool) {
    let fallback = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Path flags are taken relative to the working directory, like `--config`.
fn absolute(path: &Path) -> Result<PathBuf> {
    let expanded = expand(&path.display().to_string());
    std::path::absolute(&expanded).with_context(|| format!("resolve {}", path.display()))
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut cfg = Config::load_or_default(&path);
    if let Some(dir) = &cli.data_dir {
        cfg.paths.data_dir = absolute(dir)?.display().to_string();
    }
    if let Some(queue) = &cli.queue {
        cfg.paths.queue = absolute(queue)?.display().to_string();
    }
    Ok(cfg)
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Skipped { reason } => println!("skipped: {reason}"),
        CycleOutcome::NoTask { reason } => println!("nothing to run: {reason}"),
        CycleOutcome::DryRun { task, decision } => {
            println!("dry run: would run {} ({})", task.id, task.label());
            println!("  decision: {}", decision.reason);
            if let Some(cap) = task.max_budget_usd.or(decision.available_budget) {
                println!("  max budget: ${cap:.2}");
            }
        }
        CycleOutcome::Executed { task, result, new_status } => {
            let cost = result.cost_usd.map_or_else(|| "unknown".to_string(), |c| format!("${c:.2}"));
            if result.success {
                println!("ran {}: ok in {:.1}s, cost {cost}; now {new_status}", task.id, result.duration_ms as f64 / 1000.0);
            } else {
                let err = result.error.as_deref().unwrap_or("unknown error");
                let excerpt: String = err.chars().take(300).collect();
                println!("ran {}: FAILED after {:.1}s: {excerpt}", task.id, result.duration_ms as f64 / 1000.0);
            }
        }
        CycleOutcome::Aborted { task_id, reason } => println!("did not start {task_id}: {reason}"),
        CycleOutcome::QuietHours => println!("quiet hours; nothing done"),
    }
}

fn print_transition(id: &str, status: Option<TaskStatus>) -> Result<()> {
    match status {
        Some(s) => {
            println!("{id}: {s}");
            Ok(())
        }
        None => bail!("no task with id {id:?} in the queue"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log, cli.verbose);

    let cfg = load_config(&cli)?;
    let runner = Runner::open(cfg);

    match cli.cmd.unwrap_or(Command::RunOnce) {
        Command::RunOnce => print_outcome(&runner.run_once(false).await),
        Command::DryRun => print_outcome(&runner.run_once(true).await),
        Command::Watch => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown requested; letting the current cycle finish");
                flag.store(true, Ordering::SeqCst);
            });
            runner.watch(shutdown).await;
        }
        Command::Status { json } => {
            let report = runner.status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }
        Command::Enable { id } => print_transition(&id, runner.enable(&id)?)?,
        Command::Reset { id } => print_transition(&id, runner.reset(&id)?)?,
    }
    Ok(())
}
