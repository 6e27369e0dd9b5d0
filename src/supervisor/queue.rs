//! Bounded FIFO of caught-but-not-yet-dispatched signals.
//!
//! The producer is the deferring signal disposition, so the push path must
//! stay async-signal-safe: no locks, no allocation, no logging. The consumer
//! is the main loop. Producers never nest because the disposition's signal
//! mask blocks all signals while it runs.

use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

/// Maximum number of signals held before new deliveries are dropped.
pub const SIGNAL_QUEUE_MAX: usize = 5;

/// Lock-free single-producer/single-consumer ring of raw signal numbers.
pub struct SignalQueue {
    slots: [AtomicI32; SIGNAL_QUEUE_MAX],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl SignalQueue {
    pub const fn new() -> Self {
        Self {
            slots: [
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
            ],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Append a raw signal number. Returns `false` when the queue is full.
    ///
    /// Async-signal-safe.
    pub fn push(&self, signum: i32) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= SIGNAL_QUEUE_MAX {
            return false;
        }
        self.slots[tail % SIGNAL_QUEUE_MAX].store(signum, Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pop the oldest pending signal.
    pub fn pop(&self) -> Option<Signal> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let signum = self.slots[head % SIGNAL_QUEUE_MAX].load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Signal::try_from(signum).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}
