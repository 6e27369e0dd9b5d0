//! Error types for warden.

use thiserror::Error;

/// Main error type for warden.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("signal handler already started")]
    AlreadyStarted,

    #[error("signal handler not started")]
    NotStarted,

    #[error("duplicate signal mapping: {0}")]
    DuplicateSignalMapping(String),

    #[error("unknown signal name '{0}'")]
    UnknownSignal(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("unknown worker class '{0}'")]
    UnknownWorkerClass(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("signal handler main loop failed: {0}")]
    MainLoop(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),
}

/// Result type alias for warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
