use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::info;

use crate::config::WatchConfig;
use crate::cycle::CycleOutcome;

pub const SLEEP_SLICE: Duration = Duration::from_secs(5);

/// Repeats cycles on a fixed interval until `shutdown` is set.
///
/// The flag is checked before every cycle and between sleep slices. A cycle
/// in flight always runs to completion.
pub struct Scheduler {
    pub watch: WatchConfig,
    pub interval: Duration,
    pub slice: Duration,
    pub shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(watch: WatchConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            interval: watch.interval(),
            watch,
            slice: SLEEP_SLICE,
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs until shutdown; returns the number of cycles started.
    pub async fn run<F, Fut>(&self, mut cycle: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CycleOutcome>,
    {
        info!(interval_secs = self.interval.as_secs(), "watch loop started");
        let mut cycles = 0;
        while !self.stopping() {
            let outcome = if self.watch.is_quiet_now() {
                CycleOutcome::QuietHours
            } else {
                cycles += 1;
                cycle().await
            };
            info!(cycle = cycles, outcome = outcome_label(&outcome), "cycle finished");
            self.pause().await;
        }
        info!(cycles, "watch loop stopped");
        cycles
    }

    async fn pause(&self) {
        // an interval past the clock's range just sleeps until shutdown
        let until = Instant::now().checked_add(self.interval);
        while !self.stopping() {
            let left = match until {
                Some(until) => until.saturating_duration_since(Instant::now()),
                None => self.slice,
            };
            if left.is_zero() {
                break;
            }
            sleep(self.slice.min(left)).await;
        }
    }
}

pub fn outcome_label(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Skipped { .. } => "skipped",
        CycleOutcome::NoTask { .. } => "no-task",
        CycleOutcome::DryRun { .. } => "dry-run",
        CycleOutcome::Executed { .. } => "executed",
        CycleOutcome::Aborted { .. } => "aborted",
        CycleOutcome::QuietHours => "quiet-hours",
    }
}
