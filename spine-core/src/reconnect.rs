//! Redial backoff for connect endpoints.

use crate::options::SocketOptions;
use std::time::Duration;

/// Delay schedule between dial attempts of one connect endpoint.
///
/// The wait doubles after each failure until it reaches
/// `reconnect_ivl_max`. Without a ceiling (`reconnect_ivl_max` zero or not
/// above `reconnect_ivl`) every wait is `reconnect_ivl`.
///
/// ```rust
/// use spine_core::options::SocketOptions;
/// use spine_core::reconnect::Backoff;
/// use std::time::Duration;
///
/// let options = SocketOptions::default()
///     .with_reconnect_ivl(Duration::from_millis(100))
///     .with_reconnect_ivl_max(Duration::from_millis(250));
///
/// let mut backoff = Backoff::new(&options);
/// let waits: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
/// assert_eq!(waits, [100, 200, 250, 250]);
///
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    ceiling: Option<Duration>,
    failures: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(options: &SocketOptions) -> Self {
        let ceiling = if options.reconnect_ivl_max.as_nanos() > options.reconnect_ivl.as_nanos() {
            Some(options.reconnect_ivl_max)
        } else {
            None
        };
        Self {
            base: options.reconnect_ivl,
            ceiling,
            failures: 0,
        }
    }

    /// Wait before the next attempt. Counts as one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.ceiling {
            None => self.base,
            // Shift capped so the multiplier cannot overflow.
            Some(ceiling) => self
                .base
                .saturating_mul(1 << self.failures.min(20))
                .min(ceiling),
        };
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Forget past failures after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(base_ms: u64, max_ms: u64) -> Backoff {
        Backoff::new(
            &SocketOptions::new()
                .with_reconnect_ivl(Duration::from_millis(base_ms))
                .with_reconnect_ivl_max(Duration::from_millis(max_ms)),
        )
    }

    fn take(b: &mut Backoff, n: usize) -> Vec<u128> {
        (0..n).map(|_| b.next_delay().as_millis()).collect()
    }

    #[test]
    fn test_doubles_up_to_ceiling() {
        let mut b = backoff(100, 10_000);
        assert_eq!(take(&mut b, 5), [100, 200, 400, 800, 1600]);
        assert_eq!(b.failures(), 5);

        let mut b = backoff(100, 500);
        assert_eq!(take(&mut b, 5), [100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_flat_without_ceiling() {
        assert_eq!(take(&mut backoff(30, 0), 4), [30, 30, 30, 30]);
        // A ceiling below the base is ignored too.
        assert_eq!(take(&mut backoff(30, 10), 3), [30, 30, 30]);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut b = backoff(100, 10_000);
        take(&mut b, 3);
        b.reset();
        assert_eq!(b.failures(), 0);
        assert_eq!(take(&mut b, 2), [100, 200]);
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut b = backoff(1, 60_000);
        for _ in 0..100 {
            assert!(b.next_delay() <= Duration::from_secs(60));
        }
    }
}
