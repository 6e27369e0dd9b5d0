//! Worker-side runtime: class registry and built-in worker bodies.
//!
//! The supervisor re-executes its own binary with the hidden `worker`
//! subcommand; everything in this module runs on the child side of that
//! boundary.

mod builtin;
mod runner;

pub use runner::run_worker;

use crate::error::{Result, WardenError};
use crate::supervisor::WorkerOptions;

/// A worker body: constructed from the options map, then started once.
///
/// Workers run to completion; the supervisor only observes their exit.
pub trait Worker {
    fn start(&mut self) -> Result<()>;
}

/// Resolve a worker class name to a constructed instance.
pub fn construct(class: &str, options: &WorkerOptions) -> Result<Box<dyn Worker>> {
    match class {
        "sleeper" => Ok(Box::new(builtin::Sleeper::new(options))),
        "ticker" => Ok(Box::new(builtin::Ticker::new(options))),
        other => Err(WardenError::UnknownWorkerClass(other.to_string())),
    }
}

/// Class names [`construct`] knows about.
pub fn known_classes() -> &'static [&'static str] {
    &["sleeper", "ticker"]
}
