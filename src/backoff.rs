//! Exponential retry backoff shared by the WiFi link and time-sync managers.

use embassy_time::Duration;

/// A retry delay that doubles after each consecutive failure and saturates at
/// a cap.
///
/// Callers that latch a fault bit once retries stop helping key off the
/// saturation flag returned by [`advance`](Self::advance).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base` and saturating at `max`.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// The delay to wait before the next attempt.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.current
    }

    /// Doubles the delay after a failed attempt, saturating at the cap.
    ///
    /// Returns `true` once the delay has reached the cap.
    pub fn advance(&mut self) -> bool {
        let doubled = Duration::from_ticks(self.current.as_ticks().saturating_mul(2));
        if doubled >= self.max {
            self.current = self.max;
            true
        } else {
            self.current = doubled;
            false
        }
    }

    /// Resets the delay to the base value after a success.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
