#![forbid(unsafe_code)]

//! Functional core for surplus: data model, run/skip evaluation, quiet hours,
//! task selection and the task lifecycle. Nothing in this crate performs I/O;
//! the shell crates load state, call in here, and persist the results.

pub mod context;
pub mod decision;
pub mod lifecycle;
pub mod model;
pub mod quiet;
pub mod usage;

mod util;

pub use context::*;
pub use decision::*;
pub use lifecycle::*;
pub use model::*;
pub use quiet::*;
pub use usage::*;
pub use util::{now_ms, round_cents};
