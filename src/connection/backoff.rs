//! Doubling reconnect delay with a cap

use std::time::Duration;

/// Reconnect delay schedule
///
/// Delays double from `base` up to `max`. The capped delay is handed out
/// once; the attempt after it is not retried.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    exhausted: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
            exhausted: false,
        }
    }

    /// Delay before the next attempt, or `None` once past the cap
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted {
            return None;
        }
        let delay = self.current.min(self.max);
        if self.current >= self.max {
            self.exhausted = true;
        }
        self.current = self.current.saturating_mul(2);
        Some(delay)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Back to `base` after a successful connect
    pub fn reset(&mut self) {
        self.current = self.base;
        self.exhausted = false;
    }

    #[cfg(test)]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
