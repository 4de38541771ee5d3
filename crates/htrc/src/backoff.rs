use std::time::Duration;

/// Exponential backoff over a fixed, bounded attempt schedule.
///
/// With base 1 s, factor 2 and 5 attempts the delays are 1, 2, 4, 8 and
/// 16 seconds, after which [`next_delay`](Self::next_delay) reports
/// exhaustion.
#[derive(Debug)]
pub struct ReconnectSchedule {
    base: Duration,
    factor: u32,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectSchedule {
    /// Creates a schedule with the given parameters.
    #[must_use]
    pub const fn new(base: Duration, factor: u32, max_attempts: u32) -> Self {
        Self {
            base,
            factor,
            max_attempts,
            attempt: 0,
        }
    }

    /// The delay to wait before the next attempt, or `None` once all
    /// attempts are spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.base * self.factor.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Restores the full attempt budget.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
