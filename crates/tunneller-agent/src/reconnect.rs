//! Reconnect backoff schedule
//!
//! The relay expects agents to retry on the fixed schedule
//! 3, 6, 12, 24, 48 seconds and then every 60 seconds.

use std::time::Duration;

const BASE_SECS: u64 = 3;
const MAX_SECS: u64 = 60;
const MAX_EXPONENT: u32 = 4;

/// Tracks consecutive connection failures and yields the delay before the
/// next attempt
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the delay to sleep before redialing
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        Self::delay_for(self.attempt)
    }

    /// Delay after `attempt` consecutive failures (1-based)
    pub fn delay_for(attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let secs = (BASE_SECS << exponent).min(MAX_SECS);
        Duration::from_secs(secs)
    }

    /// Reset after a clean session
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let expected = [3, 6, 12, 24, 48, 60, 60, 60, 60, 60];
        for (k, secs) in expected.iter().enumerate() {
            assert_eq!(
                Backoff::delay_for(k as u32 + 1),
                Duration::from_secs(*secs),
                "attempt {}",
                k + 1
            );
        }
    }

    #[test]
    fn test_next_delay_advances_and_reset_restarts() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(6));
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }
}
