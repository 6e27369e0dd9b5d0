//! Deferred signal handling: dispositions enqueue, a main loop dispatches.
//!
//! OS signal dispositions are process-global, so at most one handler may be
//! started per process. The installed disposition runs under
//! async-signal-safety rules and does exactly two things: append the signal
//! name to a bounded queue and write one byte to the self-pipe. Everything
//! richer (logging, action dispatch, pool reconciliation) happens on the
//! main-loop thread, which also guarantees that `update` runs between
//! signals rather than racing them.

use crate::error::{Result, WardenError};
use crate::supervisor::mapping::SignalMap;
use crate::supervisor::pipe::{self, SelfPipe, WakeReader};
use crate::supervisor::queue::SignalQueue;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::raw::c_int;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Payload reserved for ending the main loop; anything else is wakeup-only.
pub const STOP_MESSAGE: &str = "STOP";

/// Default wakeup payload written from signal context.
const WAKE_MESSAGE: &[u8] = b".";

/// Liveness heartbeat for the main loop.
const SNOOZE_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of dispatching one action on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the main loop running.
    Continue,
    /// Exit the main loop after the next reconciliation pass.
    Break,
}

/// Receiver of dispatched actions.
///
/// The pool is the target in this system, but anything that implements the
/// named actions can drive. `start` and `update` default to no-ops.
pub trait ActionTarget: Send + 'static {
    /// Whether `action` names an operation this target implements.
    fn supports(&self, action: &str) -> bool;

    /// Perform `action`, or fail with `UnknownAction`.
    fn invoke(&mut self, action: &str) -> Result<Flow>;

    /// Called once before the main loop starts.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after every main-loop iteration.
    fn update(&mut self) -> Result<()> {
        Ok(())
    }
}

// Process-global signal plumbing. Dispositions are process-global state, so
// the queue and wake fd must be reachable from any thread's signal context.
static STARTED: AtomicBool = AtomicBool::new(false);
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static SIGNAL_QUEUE: SignalQueue = SignalQueue::new();
static ORIGINAL_DISPOSITIONS: Mutex<Vec<(Signal, SigAction)>> = Mutex::new(Vec::new());

/// The deferring disposition. Runs in signal context: append and wake only.
extern "C" fn deferred_handler(signum: c_int) {
    if !SIGNAL_QUEUE.push(signum) {
        // Queue full: drop the signal with a raw, allocation-free diagnostic.
        let stderr = unsafe { std::os::fd::BorrowedFd::borrow_raw(2) };
        let _ = nix::unistd::write(stderr, b"warden: signal queue overflow, signal dropped\n");
    }
    let fd = WAKE_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let _ = pipe::wake(fd, WAKE_MESSAGE);
    }
}

/// Wake the main loop with `msg` without blocking.
///
/// Safe to call from signal context. The reserved payload [`STOP_MESSAGE`]
/// makes the loop exit; anything else is wakeup-only.
pub fn wakeup(msg: &str) -> Result<()> {
    let fd = WAKE_FD.load(Ordering::Acquire);
    if fd < 0 {
        return Err(WardenError::NotStarted);
    }
    pipe::wake(fd, msg.as_bytes())?;
    Ok(())
}

/// Called in a freshly forked child before it runs worker code.
///
/// Drops the self-pipe without closing it (the parent still owns the pipe),
/// restores original dispositions, and releases the singleton. The signal
/// queue is left untouched.
pub fn reset_for_fork() {
    WAKE_FD.store(-1, Ordering::Release);
    restore_dispositions();
    STARTED.store(false, Ordering::Release);
}

/// Handle to the started signal dispatcher.
///
/// Exactly one may be started per process. Dropping a running handler stops
/// and joins it.
pub struct SignalHandler<T: ActionTarget> {
    thread: Option<JoinHandle<T>>,
    // Keeps the write end open for `stop`; the raw fd is mirrored in WAKE_FD.
    write_end: Option<OwnedFd>,
}

impl<T: ActionTarget> SignalHandler<T> {
    /// Install dispositions and launch the main loop around `target`.
    ///
    /// Fails fast with `UnknownAction` if the target does not implement
    /// every action referenced by `mappings`, and with `AlreadyStarted` if
    /// another handler owns the process dispositions. Calls `target.start`
    /// before the loop begins.
    pub fn start(mappings: SignalMap, target: T) -> Result<Self> {
        if STARTED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WardenError::AlreadyStarted);
        }
        match Self::start_inner(mappings, target) {
            Ok(handler) => Ok(handler),
            Err(e) => {
                STARTED.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn start_inner(mappings: SignalMap, mut target: T) -> Result<Self> {
        for action in mappings.action_names() {
            if !target.supports(action) {
                return Err(WardenError::UnknownAction(action.to_string()));
            }
        }

        let (reader, write_end) = SelfPipe::new()?.into_parts();
        WAKE_FD.store(write_end.as_raw_fd(), Ordering::Release);

        let result = install_dispositions(&mappings).and_then(|()| target.start());
        if let Err(e) = result {
            restore_dispositions();
            WAKE_FD.store(-1, Ordering::Release);
            return Err(e);
        }

        let thread = std::thread::Builder::new()
            .name("signal-loop".to_string())
            .spawn(move || main_loop(mappings, reader, target));
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                restore_dispositions();
                WAKE_FD.store(-1, Ordering::Release);
                return Err(e.into());
            }
        };

        info!("Signal handler started");
        Ok(Self {
            thread: Some(thread),
            write_end: Some(write_end),
        })
    }

    /// Restore original dispositions and ask the main loop to exit.
    ///
    /// Does not join; use [`SignalHandler::join`] to wait for the loop.
    pub fn stop(&mut self) -> Result<()> {
        if !STARTED.load(Ordering::Acquire) {
            return Err(WardenError::NotStarted);
        }
        restore_dispositions();
        let write_end = self.write_end.as_ref().ok_or(WardenError::NotStarted)?;
        pipe::wake(write_end.as_raw_fd(), STOP_MESSAGE.as_bytes())?;
        WAKE_FD.store(-1, Ordering::Release);
        STARTED.store(false, Ordering::Release);
        info!("Signal handler stopped");
        Ok(())
    }

    /// Wait for the main loop to exit and take back the target.
    pub fn join(&mut self) -> Result<T> {
        let thread = self.thread.take().ok_or(WardenError::NotStarted)?;
        let target = thread
            .join()
            .map_err(|_| WardenError::MainLoop("signal loop panicked".to_string()))?;
        // The loop may have exited on its own (a Break action); release the
        // process-global state if stop() was never called.
        if STARTED.load(Ordering::Acquire) {
            restore_dispositions();
            WAKE_FD.store(-1, Ordering::Release);
            STARTED.store(false, Ordering::Release);
        }
        self.write_end = None;
        Ok(target)
    }
}

impl<T: ActionTarget> Drop for SignalHandler<T> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
            let _ = self.join();
        }
    }
}

/// Install the deferring disposition for every mapped signal, saving the
/// originals for restore.
fn install_dispositions(mappings: &SignalMap) -> Result<()> {
    let deferring = SigAction::new(
        SigHandler::Handler(deferred_handler),
        SaFlags::SA_RESTART,
        // Block everything while the disposition runs so queue producers
        // never nest.
        SigSet::all(),
    );
    let mut saved = ORIGINAL_DISPOSITIONS
        .lock()
        .expect("disposition table poisoned");
    saved.clear();
    for signal in mappings.signals() {
        let original = unsafe { sigaction(signal, &deferring) }?;
        saved.push((signal, original));
    }
    Ok(())
}

/// Put every saved disposition back.
///
/// Restoring the saved action also covers SIGCHLD correctly: a disposition
/// that was never customized goes back to SIG_DFL, keeping wait-based
/// reaping elsewhere in the process functional.
fn restore_dispositions() {
    let mut saved = ORIGINAL_DISPOSITIONS
        .lock()
        .expect("disposition table poisoned");
    for (signal, original) in saved.drain(..) {
        unsafe {
            let _ = sigaction(signal, &original);
        }
    }
}

/// The single background task driving dispatch.
fn main_loop<T: ActionTarget>(mappings: SignalMap, reader: WakeReader, mut target: T) -> T {
    debug!("Signal loop started");
    loop {
        let flow = handle_signal_queue(&mappings, &mut target);
        if let Err(e) = target.update() {
            warn!(error = %e, "Target update failed");
        }
        if flow == Flow::Break {
            break;
        }
        if !SIGNAL_QUEUE.is_empty() {
            // More signals pending; dispatch them before sleeping.
            continue;
        }
        match reader.snooze(SNOOZE_TIMEOUT) {
            Ok(Some(msg)) if msg.contains(STOP_MESSAGE) => break,
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Self-pipe read failed, exiting signal loop");
                break;
            }
        }
    }
    debug!("Signal loop exiting");
    target
}

/// Dispatch at most one pending signal, so reconciliation runs between
/// signals. Returns the last action's flow.
fn handle_signal_queue<T: ActionTarget>(mappings: &SignalMap, target: &mut T) -> Flow {
    let Some(signal) = SIGNAL_QUEUE.pop() else {
        return Flow::Continue;
    };
    let Some(actions) = mappings.actions(signal) else {
        debug!(signal = signal.as_str(), "No actions mapped for signal");
        return Flow::Continue;
    };
    let mut flow = Flow::Continue;
    for action in actions {
        debug!(signal = signal.as_str(), action = %action, "Dispatching action");
        match target.invoke(action) {
            Ok(f) => flow = f,
            Err(e) => {
                error!(
                    signal = signal.as_str(),
                    action = %action,
                    error = %e,
                    "Action failed"
                );
            }
        }
    }
    flow
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    // Installing dispositions is process-global; these tests take turns.
    static SERIAL: Mutex<()> = Mutex::new(());

    #[derive(Clone, Default)]
    struct StubTarget {
        invoked: Arc<Mutex<Vec<String>>>,
        updates: Arc<AtomicUsize>,
        break_on: Option<String>,
    }

    impl StubTarget {
        fn invoked(&self) -> Vec<String> {
            self.invoked.lock().unwrap().clone()
        }
    }

    impl ActionTarget for StubTarget {
        fn supports(&self, action: &str) -> bool {
            action != "unsupported"
        }

        fn invoke(&mut self, action: &str) -> Result<Flow> {
            self.invoked.lock().unwrap().push(action.to_string());
            if self.break_on.as_deref() == Some(action) {
                Ok(Flow::Break)
            } else {
                Ok(Flow::Continue)
            }
        }

        fn update(&mut self) -> Result<()> {
            self.updates.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn usr1_map(action: &str) -> SignalMap {
        SignalMap::new(vec![("USR1".to_string(), action)]).unwrap()
    }

    #[test]
    fn test_dispatches_raised_signal_and_runs_update() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        let target = StubTarget::default();
        let probe = target.clone();
        let mut handler = SignalHandler::start(usr1_map("poke"), target).unwrap();

        raise(Signal::SIGUSR1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            probe.invoked().contains(&"poke".to_string())
        }));

        handler.stop().unwrap();
        let target = handler.join().unwrap();
        assert_eq!(target.invoked(), vec!["poke".to_string()]);
        // Update ran at least once per loop iteration.
        assert!(probe.updates.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_second_start_fails_while_running() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        let mut handler = SignalHandler::start(usr1_map("poke"), StubTarget::default()).unwrap();
        let second = SignalHandler::start(usr1_map("poke"), StubTarget::default());
        assert!(matches!(second, Err(WardenError::AlreadyStarted)));

        handler.stop().unwrap();
        handler.join().unwrap();
    }

    #[test]
    fn test_unknown_action_fails_fast_and_releases_singleton() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        let result = SignalHandler::start(usr1_map("unsupported"), StubTarget::default());
        assert!(matches!(result, Err(WardenError::UnknownAction(_))));

        // The failed start must not leave the singleton held.
        let mut handler = SignalHandler::start(usr1_map("poke"), StubTarget::default()).unwrap();
        handler.stop().unwrap();
        handler.join().unwrap();
    }

    #[test]
    fn test_stop_message_ends_the_loop() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        let mut handler = SignalHandler::start(usr1_map("poke"), StubTarget::default()).unwrap();
        handler.stop().unwrap();
        // join returns because stop woke the loop with STOP.
        handler.join().unwrap();
    }

    #[test]
    fn test_break_action_ends_the_loop_without_stop() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        let target = StubTarget {
            break_on: Some("halt".to_string()),
            ..Default::default()
        };
        let updates = target.updates.clone();
        let mut handler = SignalHandler::start(usr1_map("halt"), target).unwrap();

        raise(Signal::SIGUSR1).unwrap();
        let target = handler.join().unwrap();
        assert_eq!(target.invoked(), vec!["halt".to_string()]);
        // The reconciliation pass still runs after the breaking action.
        assert!(updates.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_reset_for_fork_releases_handler_state() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        let target = StubTarget {
            break_on: Some("halt".to_string()),
            ..Default::default()
        };
        let mut handler = SignalHandler::start(usr1_map("halt"), target).unwrap();

        // What a freshly forked child runs before its worker body.
        reset_for_fork();

        // The child no longer sees the parent's pipe, and the singleton is
        // free for it to start a handler of its own.
        assert!(matches!(wakeup("."), Err(WardenError::NotStarted)));
        let mut child_handler =
            SignalHandler::start(usr1_map("poke"), StubTarget::default()).unwrap();
        child_handler.stop().unwrap();
        child_handler.join().unwrap();

        // This test shares one process with the "parent" loop, which is
        // still parked on its own pipe. The queue survives reset_for_fork,
        // so the breaking signal can be fed to it directly.
        SIGNAL_QUEUE.push(Signal::SIGUSR1 as i32);
        handler.join().unwrap();
    }

    #[test]
    fn test_wakeup_requires_started_handler() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        assert!(matches!(wakeup("."), Err(WardenError::NotStarted)));
    }

    #[test]
    fn test_actions_dispatch_in_listed_order() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

        let mappings = SignalMap::new(vec![(
            "USR1".to_string(),
            vec!["first".to_string(), "second".to_string()],
        )])
        .unwrap();
        let target = StubTarget::default();
        let probe = target.clone();
        let mut handler = SignalHandler::start(mappings, target).unwrap();

        raise(Signal::SIGUSR1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            probe.invoked().len() == 2
        }));

        handler.stop().unwrap();
        let target = handler.join().unwrap();
        assert_eq!(
            target.invoked(),
            vec!["first".to_string(), "second".to_string()]
        );
    }
}
