//! warden - fixed-size worker-pool supervisor for POSIX hosts.
//!
//! warden spawns worker subprocesses to a configured target count, observes
//! their liveness, replaces those that die, and drives lifecycle transitions
//! (graceful shutdown, forced termination, reload) in response to OS signals
//! delivered to the supervisor process.
//!
//! The crate splits along the process boundary:
//!
//! - [`supervisor`] is the parent side: the worker [`supervisor::Pool`], the
//!   process factory [`supervisor::WorkerHandler`], and the deferred
//!   [`supervisor::SignalHandler`] that turns asynchronous signal delivery
//!   into a serialized stream of pool actions.
//! - [`worker`] is the child side: the class registry and the built-in
//!   worker bodies the supervisor re-executes itself into.

pub mod cli;
pub mod error;
pub mod logging;
pub mod supervisor;
pub mod worker;

pub use error::{Result, WardenError};
