//! Self-pipe wakeup channel.
//!
//! The pipe is the only cross-context signalling path in the supervisor:
//! the deferring signal disposition writes a byte on the write end, and the
//! main loop blocks on the read end. Both ends are close-on-exec so spawned
//! workers never inherit them, and non-blocking so neither side can stall.

use crate::error::Result;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

/// A freshly created self-pipe pair.
pub struct SelfPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl SelfPipe {
    pub fn new() -> Result<Self> {
        let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        Ok(Self { read, write })
    }

    /// Split into the reader consumed by the main loop and the write end
    /// kept by the handler.
    pub fn into_parts(self) -> (WakeReader, OwnedFd) {
        (WakeReader { fd: self.read }, self.write)
    }
}

/// Read end of the self-pipe, owned by the main loop.
pub struct WakeReader {
    fd: OwnedFd,
}

impl WakeReader {
    /// Block until woken or `timeout` elapses.
    ///
    /// Drains every byte currently available and returns the payload, or
    /// `None` on timeout. The timeout is the main loop's liveness heartbeat.
    pub fn snooze(&self, timeout: Duration) -> Result<Option<String>> {
        let timeout_ms = PollTimeout::from(timeout.as_millis().min(u16::MAX as u128) as u16);
        loop {
            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, timeout_ms) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut payload = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(self.fd.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) => payload.extend_from_slice(&buf[..n]),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
    }
}

/// Write `msg` to a wake fd without blocking.
///
/// Retries on EINTR. A full pipe (EAGAIN) counts as success: the reader
/// already has a pending wakeup. Async-signal-safe.
pub fn wake(fd: RawFd, msg: &[u8]) -> nix::Result<()> {
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut rest = msg;
    while !rest.is_empty() {
        match unistd::write(fd, rest) {
            Ok(n) => rest = &rest[n..],
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_wake_then_snooze_returns_payload() {
        let (reader, write) = SelfPipe::new().unwrap().into_parts();
        wake(write.as_raw_fd(), b".").unwrap();
        let msg = reader.snooze(Duration::from_secs(1)).unwrap();
        assert_eq!(msg.as_deref(), Some("."));
    }

    #[test]
    fn test_snooze_times_out_when_quiet() {
        let (reader, _write) = SelfPipe::new().unwrap().into_parts();
        let msg = reader.snooze(Duration::from_millis(20)).unwrap();
        assert_eq!(msg, None);
    }

    #[test]
    fn test_snooze_drains_all_pending_wakeups() {
        let (reader, write) = SelfPipe::new().unwrap().into_parts();
        wake(write.as_raw_fd(), b".").unwrap();
        wake(write.as_raw_fd(), b".").unwrap();
        wake(write.as_raw_fd(), b"STOP").unwrap();
        let msg = reader.snooze(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(msg, "..STOP");
        assert!(msg.contains("STOP"));
    }

    #[test]
    fn test_wake_survives_full_pipe() {
        let (_reader, write) = SelfPipe::new().unwrap().into_parts();
        // Pipe capacity is finite; a writer that never blocks must treat a
        // full pipe as success.
        let chunk = [b'.'; 4096];
        for _ in 0..64 {
            wake(write.as_raw_fd(), &chunk).unwrap();
        }
    }
}
