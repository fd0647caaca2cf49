#![forbid(unsafe_code)]

//! The imperative shell: configuration, the executor, the cycle controller
//! and the watch loop.

pub mod config;
pub mod cycle;
pub mod executor;
pub mod permissions;
pub mod runner;
pub mod scheduler;
pub mod status;

pub use config::*;
pub use cycle::*;
pub use executor::*;
pub use permissions::PermissionsGuard;
pub use runner::*;
pub use scheduler::*;
pub use status::*;
