//! Worker-pool supervision.
//!
//! This module is the supervisor side of warden: a pool of worker
//! subprocesses driven by a deferred signal handler.
//!
//! # Architecture
//!
//! ```text
//!   OS signal ──► deferring disposition ──► bounded queue + self-pipe
//!                                                   │
//!                                            ┌──────▼──────┐
//!                                            │  main loop  │
//!                                            │ (one thread)│
//!                                            └──────┬──────┘
//!                                        actions +  │ update
//!                                            ┌──────▼──────┐
//!                                            │    Pool     │
//!                                            └──┬───┬───┬──┘
//!                                          ┌────▼┐ ┌▼───┐ ... worker
//!                                          │ w 1 │ │w 2 │     processes
//!                                          └─────┘ └────┘
//! ```
//!
//! The disposition runs under async-signal-safety rules and only enqueues
//! and wakes; dispatch, reconciliation, and logging all happen on the main
//! loop thread. The pool itself is purely mechanical and never touches
//! signal dispositions.

mod handler;
mod mapping;
mod pipe;
mod pool;
mod queue;
mod reap;
mod signal_handler;

pub use handler::{OPTIONS_ENV, WorkerHandler, parse_preamble};
pub use mapping::{ActionList, SignalMap, normalize_signal_name};
pub use pool::{Pool, PoolConfig, WorkerOptions};
pub use queue::SIGNAL_QUEUE_MAX;
pub use reap::{TerminationReason, classify_wait_status};
pub use signal_handler::{
    ActionTarget, Flow, STOP_MESSAGE, SignalHandler, reset_for_fork, wakeup,
};
