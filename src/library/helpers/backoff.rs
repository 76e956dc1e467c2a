//! Exponential backoff implementations

use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Returns monotonically increasing values until the `ceiling` is reached. From then on the
/// ceiling is returned indefinitely, which makes it suitable for loops that treat errors as
/// transient and never give up. Call [`reset`](Backoff::reset) after a successful attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    ceiling: Duration,
    multiplier: u32,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(25), Duration::from_secs(5))
    }
}

impl Backoff {
    /// Creates a new instance starting at `initial` and doubling until `ceiling` is reached
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        Self {
            initial,
            ceiling,
            multiplier: 2,
            current: initial,
        }
    }

    /// Starts over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.current;
        self.current = (self.current * self.multiplier).min(self.ceiling);
        Some(delay)
    }
}
