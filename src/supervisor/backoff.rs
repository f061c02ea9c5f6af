use std::time::Duration;

/// Reconnect delay doubling from `initial` up to `max`
///
/// There is no retry limit: a feed keeps trying for as long as it is owned.
/// The floor of `initial` caps how often a failing upstream is hit.
#[derive(Debug)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current_attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current_attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt.min(16));
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.current_attempt = self.current_attempt.saturating_add(1);
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
