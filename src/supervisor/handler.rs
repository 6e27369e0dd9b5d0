//! Worker process factory.
//!
//! A `WorkerHandler` binds a worker class to the environment it needs and to
//! the action-to-signal table used when killing its children. Spawning
//! re-executes the supervisor binary with the hidden `worker` subcommand, so
//! every worker is a fresh process with default signal dispositions.

use crate::error::{Result, WardenError};
use crate::supervisor::mapping::normalize_signal_name;
use crate::supervisor::pool::WorkerOptions;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Environment variable carrying the JSON-encoded options map to the child.
pub const OPTIONS_ENV: &str = "WARDEN_WORKER_OPTIONS";

/// Counter for stderr forwarder thread names.
static STDERR_FORWARDER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Factory for worker subprocesses of one class.
#[derive(Debug, Clone)]
pub struct WorkerHandler {
    /// Identifier used in logs and worker process arguments.
    name: String,
    /// Registry key resolved on the child side.
    worker_class: String,
    /// `KEY=VALUE` assignments applied to the child environment.
    env_preamble: Vec<(String, String)>,
    /// Action name to OS signal, e.g. `stop_forcefully` to `SIGKILL`.
    signal_mappings: HashMap<String, Signal>,
    /// Extra directories prepended to the child's PATH.
    load_path: Vec<PathBuf>,
    /// Executable to re-exec; the current executable when unset.
    program: Option<PathBuf>,
}

impl WorkerHandler {
    /// Build a handler, validating every signal name in `action_signals`.
    pub fn new<N, C>(name: N, worker_class: C, action_signals: Vec<(String, String)>) -> Result<Self>
    where
        N: Into<String>,
        C: Into<String>,
    {
        let mut signal_mappings = HashMap::new();
        for (action, signal_name) in action_signals {
            let signal = normalize_signal_name(&signal_name)?;
            if signal_mappings.insert(action.clone(), signal).is_some() {
                return Err(WardenError::InvalidOption(format!(
                    "duplicate action '{}' in action-signal table",
                    action
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            worker_class: worker_class.into(),
            env_preamble: Vec::new(),
            signal_mappings,
            load_path: Vec::new(),
            program: None,
        })
    }

    /// The canonical action-to-signal table.
    pub fn canonical_action_signals() -> Vec<(String, String)> {
        vec![
            ("stop_forcefully".to_string(), "KILL".to_string()),
            ("stop_gracefully".to_string(), "TERM".to_string()),
        ]
    }

    /// Attach a parsed environment preamble.
    pub fn with_preamble(mut self, snippet: &str) -> Result<Self> {
        self.env_preamble = parse_preamble(snippet)?;
        Ok(self)
    }

    /// Attach extra worker search paths.
    pub fn with_load_path(mut self, load_path: Vec<PathBuf>) -> Self {
        self.load_path = load_path;
        self
    }

    /// Override the executable spawned for workers.
    ///
    /// Defaults to the current executable; integration tests point this at
    /// the built binary.
    pub fn with_program(mut self, program: PathBuf) -> Self {
        self.program = Some(program);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_class(&self) -> &str {
        &self.worker_class
    }

    /// Resolve an action name to the signal sent for it.
    pub fn signal_for(&self, action: &str) -> Result<Signal> {
        self.signal_mappings
            .get(action)
            .copied()
            .ok_or_else(|| WardenError::UnknownAction(action.to_string()))
    }

    /// Spawn one worker configured with `options`.
    ///
    /// The parent returns the child PID immediately; the pool reaps by PID.
    /// The child's stderr is piped back and re-logged through tracing by a
    /// named forwarder thread.
    pub fn spawn(&self, options: &WorkerOptions) -> Result<Pid> {
        let program = match &self.program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(|e| {
                WardenError::Worker(format!("failed to locate supervisor executable: {}", e))
            })?,
        };

        let mut cmd = Command::new(&program);
        cmd.arg("worker")
            .arg("--class")
            .arg(&self.worker_class)
            .arg("--pool")
            .arg(&self.name);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        for (key, value) in &self.env_preamble {
            cmd.env(key, value);
        }
        cmd.env(OPTIONS_ENV, serde_json::to_string(options)?);

        if !self.load_path.is_empty() {
            cmd.env("PATH", prepend_path(&self.load_path)?);
        }

        // Workers must start from default dispositions, whatever the
        // supervisor has installed.
        unsafe {
            cmd.pre_exec(reset_signal_dispositions);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| WardenError::Worker(format!("failed to spawn worker: {}", e)))?;
        let pid = Pid::from_raw(child.id() as i32);

        if let Some(stderr) = child.stderr.take() {
            let forwarder_id = STDERR_FORWARDER_COUNTER.fetch_add(1, Ordering::Relaxed);
            let pool = self.name.clone();
            std::thread::Builder::new()
                .name(format!("{}-stderr-{}", pool, forwarder_id))
                .spawn(move || forward_worker_stderr(pool, pid, stderr))
                .ok(); // stderr forwarding is best-effort
        }

        // The pool reaps via waitpid; dropping the std handle does not wait.
        drop(child);

        Ok(pid)
    }
}

/// Parse an environment preamble into `KEY=VALUE` assignments.
///
/// One assignment per line; blank lines and `#` comments are skipped.
pub fn parse_preamble(snippet: &str) -> Result<Vec<(String, String)>> {
    let mut assignments = Vec::new();
    for line in snippet.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            WardenError::InvalidOption(format!("preamble line '{}' is not KEY=VALUE", line))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(WardenError::InvalidOption(format!(
                "preamble line '{}' has an empty key",
                line
            )));
        }
        assignments.push((key.to_string(), value.trim().to_string()));
    }
    Ok(assignments)
}

/// Build the child's PATH with `extra` directories in front.
fn prepend_path(extra: &[PathBuf]) -> Result<std::ffi::OsString> {
    let mut parts: Vec<PathBuf> = extra.to_vec();
    if let Some(existing) = std::env::var_os("PATH") {
        parts.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(parts)
        .map_err(|e| WardenError::InvalidOption(format!("invalid load path: {}", e)))
}

/// Runs between fork and exec in the child: every catchable signal goes back
/// to its default disposition. Async-signal-safe.
fn reset_signal_dispositions() -> std::io::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in Signal::iterator() {
        if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        unsafe {
            let _ = sigaction(signal, &default);
        }
    }
    Ok(())
}

/// Forward a worker's stderr lines into the supervisor's log.
fn forward_worker_stderr(pool: String, pid: Pid, stderr: std::process::ChildStderr) {
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break, // pipe closed
        };
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!(pool = %pool, worker_pid = pid.as_raw(), "{}", line);
    }
}
