//! Pacing for re-asking `on_disconnect` while a reconnect is pending.

use std::time::{Duration, Instant};

/// Doubling delay between reconnect re-asks.
///
/// A zero initial delay disables pacing: every loop tick is due.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    next_at: Option<Instant>,
}

impl Backoff {
    /// Start at `initial`, doubling up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
            next_at: None,
        }
    }

    /// Forget previous attempts.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.next_at = None;
    }

    /// Record an unacknowledged ask at `now` and push the next one out.
    pub fn schedule(&mut self, now: Instant) {
        if self.initial.is_zero() {
            return;
        }
        self.next_at = Some(now + self.current);
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    /// Returns true if the next ask may happen at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_at.is_none_or(|at| now >= at)
    }

    /// Time left until the next ask, `None` when pacing is off or nothing
    /// is scheduled.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.next_at.map(|at| at.saturating_duration_since(now))
    }

    /// Delay that the next [`Backoff::schedule`] will apply.
    pub fn current(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let t0 = Instant::now();
        assert!(backoff.is_due(t0));

        backoff.schedule(t0);
        assert!(!backoff.is_due(t0 + Duration::from_millis(99)));
        assert!(backoff.is_due(t0 + Duration::from_millis(100)));
        assert_eq!(backoff.current(), Duration::from_millis(200));

        backoff.schedule(t0);
        assert_eq!(backoff.current(), Duration::from_millis(350));
        backoff.schedule(t0);
        assert_eq!(backoff.current(), Duration::from_millis(350));
        assert_eq!(backoff.remaining(t0), Some(Duration::from_millis(350)));
    }

    #[test]
    fn test_reset_restores_initial_delay() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        let t0 = Instant::now();
        backoff.schedule(t0);
        backoff.schedule(t0);
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(10));
        assert!(backoff.is_due(t0));
        assert_eq!(backoff.remaining(t0), None);
    }

    #[test]
    fn test_zero_delay_is_always_due() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::from_secs(1));
        let t0 = Instant::now();
        backoff.schedule(t0);
        assert!(backoff.is_due(t0));
        assert_eq!(backoff.remaining(t0), None);
    }
}
