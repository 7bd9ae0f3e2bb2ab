use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time base driving the built-in timeouts.
///
/// On a device this wraps the scheduler's tick counter; the value only has to
/// grow monotonically from an arbitrary origin.
pub trait Clock: Send {
    fn now(&self) -> Duration;
}

/// Time base backed by [`Instant`], measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Externally stepped time base. Clones share the same counter, so a test or
/// a tick interrupt can keep one handle while the machine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::AcqRel);
    }

    pub fn set(&self, to: Duration) {
        self.micros.store(to.as_micros() as u64, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Acquire))
    }
}

/// Single-shot countdown. Periodic behaviour is layered on top by reloading
/// after expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    start: Duration,
    interval: Duration,
    armed: bool,
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            start: Duration::ZERO,
            interval: Duration::ZERO,
            armed: false,
        }
    }

    /// Arm the timer to expire `interval` after `now`.
    pub fn set(&mut self, interval: Duration, now: Duration) {
        self.start = now;
        self.interval = interval;
        self.armed = true;
    }

    /// Restart the countdown with the interval of the last `set`.
    pub fn reload(&mut self, now: Duration) {
        self.start = now;
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn expired(&self, now: Duration) -> bool {
        self.armed && now.saturating_sub(self.start) >= self.interval
    }

    /// Time left before expiry, `None` when disarmed.
    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        if !self.armed {
            return None;
        }
        let elapsed = now.saturating_sub(self.start);
        Some(self.interval.saturating_sub(elapsed))
    }
}
