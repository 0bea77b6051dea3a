//! Linear, capped reconnection delay.

use crate::settings::WatchSettings;
use std::time::Duration;

/// Reconnection delay that grows by a fixed step after every failure, up to
/// a ceiling, and drops back to zero once the connection is proven healthy.
///
/// # Examples
///
/// ```rust
/// use propbag_config::watcher::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(3));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(2));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(3));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(3));
///
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    step: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at zero.
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            current: Duration::ZERO,
        }
    }

    /// Create a backoff from the step and ceiling in `settings`.
    pub fn from_settings(settings: &WatchSettings) -> Self {
        Self::new(settings.backoff_step(), settings.max_backoff())
    }

    /// Record a failure and return the delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.current = self.current.saturating_add(self.step).min(self.max);
        self.current
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    /// The delay returned by the last `next_delay`, or zero after a reset.
    pub fn current(&self) -> Duration {
        self.current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_settings(&WatchSettings::default())
    }
}
