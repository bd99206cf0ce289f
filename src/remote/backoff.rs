//! Exponential backoff for reconnect attempts.
//!
//! `delay = min(max, base * 2^attempt)`.

use std::time::Duration;

/// Exponential backoff calculator.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base_ms: u64,
    max_ms: u64,
    /// Current attempt number (0-indexed).
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Compute the next delay and advance the attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(exp.min(self.max_ms))
    }

    /// Reset the attempt counter after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles() {
        let mut b = Backoff::new(1000, 60_000);
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
        assert_eq!(b.next_delay(), Duration::from_millis(2000));
        assert_eq!(b.next_delay(), Duration::from_millis(4000));
        assert_eq!(b.attempt(), 3);
    }

    #[test]
    fn delay_capped_at_max() {
        let mut b = Backoff::new(1000, 5000);
        for _ in 0..20 {
            assert!(b.next_delay() <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn reset_resets_attempt() {
        let mut b = Backoff::new(1000, 60_000);
        for _ in 0..5 {
            let _ = b.next_delay();
        }
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn attempt_saturates() {
        let mut b = Backoff::new(1000, 60_000);
        b.attempt = u32::MAX;
        assert_eq!(b.next_delay(), Duration::from_millis(60_000));
        assert_eq!(b.attempt(), u32::MAX);
    }
}
