//! Reconnect delays

use std::time::Duration;

/// Doubling delay schedule with a retry cap
///
/// Attempt `n` (counting from zero) waits `base * 2^n`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_retries: u32,
    retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_retries,
            retries: 0,
        }
    }

    /// Delay before the next attempt, `None` once the retries are spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        let delay = self.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }
}
