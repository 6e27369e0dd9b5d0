//! Child-process entry point.
//!
//! Runs when the supervisor re-executes itself with the hidden `worker`
//! subcommand. The spawner's between-fork-and-exec hook has already put
//! every signal disposition back to its default, so the worker body starts
//! from a clean process image.

use crate::error::Result;
use crate::supervisor::{self, WorkerOptions};
use tracing::debug;

/// Run a worker class to completion inside the child process.
pub fn run_worker(class: &str, pool: &str) -> Result<()> {
    let options = read_options()?;
    debug!(pool, class, pid = std::process::id(), "Worker starting");
    let mut worker = super::construct(class, &options)?;
    worker.start()?;
    debug!(pool, class, "Worker finished");
    Ok(())
}

/// Decode the options map the spawner placed in the environment.
fn read_options() -> Result<WorkerOptions> {
    match std::env::var(supervisor::OPTIONS_ENV) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(_) => Ok(WorkerOptions::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_options_defaults_to_empty() {
        // The test environment does not set the options variable.
        let options = read_options().unwrap();
        assert!(options.is_empty());
    }
}
