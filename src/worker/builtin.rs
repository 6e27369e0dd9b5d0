//! Built-in worker classes.
//!
//! These are intentionally tiny: tests and demos need workers with a
//! controllable lifetime, not business logic.

use super::Worker;
use crate::error::Result;
use crate::supervisor::WorkerOptions;
use std::time::Duration;
use tracing::info;

/// Sleeps for `sleep` seconds from the options, or until signalled when
/// the option is absent.
pub struct Sleeper {
    duration: Option<Duration>,
}

impl Sleeper {
    pub fn new(options: &WorkerOptions) -> Self {
        let duration = options
            .get("sleep")
            .and_then(|v| v.as_f64())
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64);
        Self { duration }
    }
}

impl Worker for Sleeper {
    fn start(&mut self) -> Result<()> {
        match self.duration {
            Some(duration) => std::thread::sleep(duration),
            None => loop {
                std::thread::sleep(Duration::from_secs(3600));
            },
        }
        Ok(())
    }
}

/// Logs a heartbeat every `interval` seconds; `ticks` bounds the count.
pub struct Ticker {
    interval: Duration,
    ticks: Option<u64>,
}

impl Ticker {
    pub fn new(options: &WorkerOptions) -> Self {
        let interval = options
            .get("interval")
            .and_then(|v| v.as_f64())
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(1));
        let ticks = options.get("ticks").and_then(|v| v.as_u64());
        Self { interval, ticks }
    }
}

impl Worker for Ticker {
    fn start(&mut self) -> Result<()> {
        let mut count: u64 = 0;
        loop {
            if let Some(limit) = self.ticks
                && count >= limit
            {
                return Ok(());
            }
            info!(tick = count, "tick");
            count += 1;
            std::thread::sleep(self.interval);
        }
    }
}
