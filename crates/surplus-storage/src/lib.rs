#![forbid(unsafe_code)]

//! File-backed stores: the task queue, the run history, per-task run
//! contexts and execution reports.

pub mod context;
pub mod history;
pub mod queue;
pub mod reports;

mod fs;

pub use context::RunContextStore;
pub use fs::sanitize_component;
pub use history::HistoryFile;
pub use queue::QueueFile;
pub use reports::ReportStore;
