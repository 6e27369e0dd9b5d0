//! Classification of worker exit statuses.
//!
//! The pool only observes workers through `waitpid`; this module turns the
//! raw wait status into something loggable.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Why a worker left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
    /// Still running at probe time.
    StillAlive,
    /// Reaped elsewhere before the pool could observe the status.
    AlreadyReaped,
    /// The host reported a status we do not classify.
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// True when the child is gone from the process table.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::StillAlive)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(signal) => write!(f, "killed by {}", signal.as_str()),
            Self::StillAlive => write!(f, "still running"),
            Self::AlreadyReaped => write!(f, "already reaped"),
            Self::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Classify a `WaitStatus` from `waitpid`.
pub fn classify_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
