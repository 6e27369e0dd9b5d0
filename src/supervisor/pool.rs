//! Deterministic management of a set of worker subprocesses.
//!
//! The pool spawns workers toward a target size, kills them with per-action
//! signals, and reaps whatever exits. `workers` is strictly insertion
//! ordered: replacements append, kills drain from the tail, so long-running
//! workers accumulate at the head.

use crate::error::{Result, WardenError};
use crate::supervisor::handler::WorkerHandler;
use crate::supervisor::reap::{TerminationReason, classify_wait_status};
use crate::supervisor::signal_handler::{ActionTarget, Flow};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Opaque per-worker options map, passed JSON-encoded to each child.
pub type WorkerOptions = Map<String, Value>;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool identifier used in logs and worker process arguments.
    pub name: String,
    /// Target live-worker count.
    pub size: usize,
    /// Options handed to every spawned worker.
    pub options: WorkerOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "warden".to_string(),
            size: 4,
            options: WorkerOptions::new(),
        }
    }
}

/// A fixed-size pool of worker subprocesses.
pub struct Pool {
    config: PoolConfig,
    handler: WorkerHandler,
    /// Live child PIDs, newest at the tail.
    workers: Vec<Pid>,
    /// Killed but not yet confirmed exited; reaped opportunistically.
    pending_reap: Vec<Pid>,
    /// Set by the stop actions; `update` stops respawning once draining.
    stopping: bool,
}

impl Pool {
    pub fn new(config: PoolConfig, handler: WorkerHandler) -> Self {
        Self {
            config,
            handler,
            workers: Vec::new(),
            pending_reap: Vec::new(),
            stopping: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Live worker PIDs in spawn order.
    pub fn workers(&self) -> &[Pid] {
        &self.workers
    }

    pub fn handler(&self) -> &WorkerHandler {
        &self.handler
    }

    /// Spawn workers until the live count reaches the target size.
    pub fn start(&mut self) -> Result<()> {
        info!(
            pool = %self.config.name,
            size = self.config.size,
            class = self.handler.worker_class(),
            "Starting worker pool"
        );
        while self.workers.len() < self.config.size {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Kill every worker forcefully and reap every PID this pool knows about.
    pub fn stop(&mut self) -> Result<()> {
        info!(
            pool = %self.config.name,
            workers = self.workers.len(),
            "Stopping worker pool"
        );
        self.stopping = true;
        self.kill_workers(self.workers.len(), "stop_forcefully")?;
        // Workers already signalled with a softer action get the forced
        // signal too, so the blocking reap below cannot hang on them.
        let forced = self.handler.signal_for("stop_forcefully")?;
        for pid in &self.pending_reap {
            send_signal(*pid, forced)?;
        }
        self.cleanup_dead_workers(true)
    }

    /// Block until every currently-tracked worker has exited, reaping each.
    pub fn wait(&mut self) -> Result<()> {
        self.cleanup_dead_workers(true)
    }

    /// Steady-state reconciler: reap whatever died, then respawn toward the
    /// target size. Respawning is suppressed while the pool is draining
    /// after a stop action.
    pub fn update(&mut self) -> Result<()> {
        self.cleanup_dead_workers(false)?;
        if !self.stopping {
            self.maintain_worker_count("stop_gracefully")?;
        }
        Ok(())
    }

    /// Spawn one worker and append its PID.
    pub fn spawn_worker(&mut self) -> Result<Pid> {
        let pid = self.handler.spawn(&self.config.options)?;
        self.workers.push(pid);
        debug!(
            pool = %self.config.name,
            pid = pid.as_raw(),
            live = self.workers.len(),
            "Spawned worker"
        );
        Ok(pid)
    }

    /// Spawn `count` workers.
    pub fn spawn_workers(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Send the signal mapped to `action` and stop tracking `pid` as live.
    ///
    /// Removal is optimistic: the PID moves to the pending-reap list and is
    /// collected by [`Pool::cleanup_dead_workers`]. A kill aimed at a PID
    /// that already exited counts as success.
    pub fn kill_worker(&mut self, pid: Pid, action: &str) -> Result<()> {
        let sig = self.handler.signal_for(action)?;
        send_signal(pid, sig)?;
        debug!(
            pool = %self.config.name,
            pid = pid.as_raw(),
            action,
            signal = sig.as_str(),
            "Killed worker"
        );
        self.workers.retain(|p| *p != pid);
        if !self.pending_reap.contains(&pid) {
            self.pending_reap.push(pid);
        }
        Ok(())
    }

    /// Kill the `count` most recently spawned workers, tail-first.
    pub fn kill_workers(&mut self, count: usize, action: &str) -> Result<()> {
        for _ in 0..count {
            let Some(pid) = self.workers.last().copied() else {
                break;
            };
            self.kill_worker(pid, action)?;
        }
        Ok(())
    }

    /// Reap exited workers.
    ///
    /// Probes every tracked PID, including those already killed and awaiting
    /// reap. In blocking mode, waits for each to exit; otherwise exited
    /// children are collected without blocking. A PID that was already
    /// reaped elsewhere is removed as if it had exited here.
    pub fn cleanup_dead_workers(&mut self, blocking: bool) -> Result<()> {
        let tracked: Vec<Pid> = self
            .workers
            .iter()
            .chain(self.pending_reap.iter())
            .copied()
            .collect();
        for pid in tracked {
            self.reap_one(pid, blocking)?;
        }
        Ok(())
    }

    /// Converge the live count toward the target: kill the excess
    /// (tail-first) with `action`, or spawn the deficit.
    pub fn maintain_worker_count(&mut self, action: &str) -> Result<()> {
        let live = self.workers.len();
        let target = self.config.size;
        if live > target {
            self.kill_workers(live - target, action)?;
        } else if live < target {
            self.spawn_workers(target - live)?;
        }
        Ok(())
    }

    /// Shutdown helper: poll-reap until every tracked PID is gone or `grace`
    /// elapses, then fall back to a forced stop for stragglers.
    pub fn drain(&mut self, grace: Duration) -> Result<()> {
        let deadline = Instant::now() + grace;
        loop {
            self.cleanup_dead_workers(false)?;
            if self.workers.is_empty() && self.pending_reap.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        warn!(
            pool = %self.config.name,
            stragglers = self.workers.len() + self.pending_reap.len(),
            "Grace period expired, stopping forcefully"
        );
        self.stop()
    }

    /// Probe one PID, removing it from tracking once it is gone.
    fn reap_one(&mut self, pid: Pid, blocking: bool) -> Result<()> {
        let flags = if blocking {
            None
        } else {
            Some(WaitPidFlag::WNOHANG)
        };
        let reason = match waitpid(pid, flags) {
            Ok(status) => classify_wait_status(status),
            // Reaped elsewhere already; treated exactly like an exit here.
            Err(Errno::ECHILD) => TerminationReason::AlreadyReaped,
            Err(e) => return Err(e.into()),
        };
        if reason.is_final() {
            self.workers.retain(|p| *p != pid);
            self.pending_reap.retain(|p| *p != pid);
            debug!(
                pool = %self.config.name,
                pid = pid.as_raw(),
                status = %reason,
                "Reaped worker"
            );
        }
        Ok(())
    }

    #[cfg(test)]
    fn push_test_pid(&mut self, pid: i32) {
        self.workers.push(Pid::from_raw(pid));
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.workers.is_empty() || !self.pending_reap.is_empty() {
            let _ = self.stop();
        }
    }
}

/// Send `sig` to `pid`, treating an already-gone process as success.
fn send_signal(pid: Pid, sig: Signal) -> Result<()> {
    match signal::kill(pid, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl ActionTarget for Pool {
    fn supports(&self, action: &str) -> bool {
        matches!(action, "stop_gracefully" | "stop_forcefully" | "reload")
    }

    fn invoke(&mut self, action: &str) -> Result<Flow> {
        match action {
            "stop_gracefully" => {
                info!(pool = %self.config.name, "Stopping gracefully");
                self.stopping = true;
                self.kill_workers(self.workers.len(), "stop_gracefully")?;
                Ok(Flow::Break)
            }
            "stop_forcefully" => {
                info!(pool = %self.config.name, "Stopping forcefully");
                self.stopping = true;
                self.kill_workers(self.workers.len(), "stop_forcefully")?;
                Ok(Flow::Break)
            }
            "reload" => {
                info!(pool = %self.config.name, "Reloading workers");
                self.kill_workers(self.workers.len(), "stop_gracefully")?;
                Ok(Flow::Continue)
            }
            other => Err(WardenError::UnknownAction(other.to_string())),
        }
    }

    fn start(&mut self) -> Result<()> {
        Pool::start(self)
    }

    fn update(&mut self) -> Result<()> {
        Pool::update(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // PIDs above any realistic pid_max: kill reports ESRCH and waitpid
    // reports ECHILD, which the pool must treat as "already gone".
    const FAKE_PID_BASE: i32 = 0x7fff_0000;

    fn test_pool(size: usize) -> Pool {
        let handler = WorkerHandler::new(
            "testpool",
            "sleeper",
            WorkerHandler::canonical_action_signals(),
        )
        .unwrap();
        Pool::new(
            PoolConfig {
                name: "testpool".to_string(),
                size,
                options: WorkerOptions::new(),
            },
            handler,
        )
    }

    fn seed(pool: &mut Pool, count: i32) -> Vec<Pid> {
        for i in 0..count {
            pool.push_test_pid(FAKE_PID_BASE + i);
        }
        pool.workers().to_vec()
    }

    #[test]
    fn test_kill_workers_drains_from_tail() {
        let mut pool = test_pool(4);
        let original = seed(&mut pool, 4);

        pool.kill_workers(3, "stop_forcefully").unwrap();
        assert_eq!(pool.workers(), &original[..1]);
    }

    #[test]
    fn test_kill_worker_is_optimistic_about_gone_pids() {
        let mut pool = test_pool(1);
        let original = seed(&mut pool, 1);

        // The fake PID does not exist; the kill still succeeds and the
        // worker is no longer tracked as live.
        pool.kill_worker(original[0], "stop_gracefully").unwrap();
        assert!(pool.workers().is_empty());
    }

    #[test]
    fn test_kill_worker_unknown_action_is_fatal_to_the_action() {
        let mut pool = test_pool(1);
        let original = seed(&mut pool, 1);

        let result = pool.kill_worker(original[0], "frobnicate");
        assert!(matches!(result, Err(WardenError::UnknownAction(_))));
        // The worker stays tracked; nothing was signalled.
        assert_eq!(pool.workers(), &original[..]);
    }

    #[test]
    fn test_maintain_worker_count_kills_excess_tail_first() {
        let mut pool = test_pool(2);
        let original = seed(&mut pool, 4);

        pool.maintain_worker_count("stop_forcefully").unwrap();
        assert_eq!(pool.workers(), &original[..2]);
    }

    #[test]
    fn test_maintain_worker_count_noop_at_target() {
        let mut pool = test_pool(3);
        let original = seed(&mut pool, 3);

        pool.maintain_worker_count("stop_forcefully").unwrap();
        assert_eq!(pool.workers(), &original[..]);
    }

    #[test]
    fn test_cleanup_tolerates_already_reaped_pids() {
        let mut pool = test_pool(4);
        seed(&mut pool, 4);

        // waitpid on the fake PIDs reports ECHILD; all are removed.
        pool.cleanup_dead_workers(false).unwrap();
        assert!(pool.workers().is_empty());

        // Idempotent on an empty pool, blocking or not.
        pool.cleanup_dead_workers(true).unwrap();
        assert!(pool.workers().is_empty());
    }

    #[test]
    fn test_stop_action_sets_draining_and_breaks() {
        let mut pool = test_pool(2);
        seed(&mut pool, 2);

        let flow = pool.invoke("stop_gracefully").unwrap();
        assert_eq!(flow, Flow::Break);
        assert!(pool.workers().is_empty());

        // A draining pool must not respawn on update.
        pool.update().unwrap();
        assert!(pool.workers().is_empty());
    }

    #[test]
    fn test_reload_action_continues() {
        let mut pool = test_pool(0);
        seed(&mut pool, 2);

        let flow = pool.invoke("reload").unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(pool.workers().is_empty());
    }

    #[test]
    fn test_invoke_unknown_action() {
        let mut pool = test_pool(0);
        assert!(matches!(
            pool.invoke("dance"),
            Err(WardenError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_supports_the_kill_and_reload_vocabulary() {
        let pool = test_pool(0);
        assert!(pool.supports("stop_gracefully"));
        assert!(pool.supports("stop_forcefully"));
        assert!(pool.supports("reload"));
        assert!(!pool.supports("dance"));
    }
}
