//! Bounded polling for "wait until the OS settles" loops.

use std::time::Duration;

/// How often and how many times to re-check a condition.
///
/// A policy never fails on its own: callers learn whether the condition was
/// met and decide whether that is a warning or an error.
///
/// ```
/// use dns_redirect::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(Duration::from_millis(300), 100);
/// assert_eq!(policy.budget(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between checks.
    pub interval: Duration,
    /// Number of re-checks after the first one.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Checks once and never waits.
    #[must_use]
    pub const fn immediate() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    /// Upper bound on the total time spent sleeping.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Polls `done` on the current thread until it returns `true`.
    ///
    /// Returns `false` if the attempts ran out first.
    pub fn poll_blocking(&self, mut done: impl FnMut() -> bool) -> bool {
        if done() {
            return true;
        }
        for _ in 0..self.max_attempts {
            if !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
            if done() {
                return true;
            }
        }
        false
    }

    /// Async variant of [`poll_blocking`](Self::poll_blocking) driven by
    /// `tokio::time`, so paused-clock tests complete instantly.
    pub async fn poll(&self, mut done: impl FnMut() -> bool) -> bool {
        if done() {
            return true;
        }
        for _ in 0..self.max_attempts {
            tokio::time::sleep(self.interval).await;
            if done() {
                return true;
            }
        }
        false
    }
}
