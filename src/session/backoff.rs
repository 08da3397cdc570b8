//! Reconnect backoff policy.
//!
//! A pure function from the attempt count to the delay before the next
//! reconnect. Timers live in the driver; this module never sleeps.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default backoff base.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Default backoff cap.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Default reconnect ceiling.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

// ============================================================================
// BackoffPolicy
// ============================================================================

/// Capped exponential backoff.
///
/// The delay for attempt count `k` is `min(base * 2^k, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_INTERVAL,
            DEFAULT_MAX_RECONNECT_DELAY,
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )
    }
}

impl BackoffPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
        }
    }

    /// Returns the backoff base.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the backoff cap.
    #[inline]
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the reconnect ceiling.
    #[inline]
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay for `attempts` reconnects already made.
    ///
    /// Saturates at the cap instead of overflowing.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        2u32.checked_pow(attempts)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Returns `true` while another reconnect may be scheduled.
    #[inline]
    #[must_use]
    pub const fn should_reconnect(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Returns the next delay, or `None` once the ceiling is reached.
    #[inline]
    #[must_use]
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        self.should_reconnect(attempts).then(|| self.delay(attempts))
    }
}

// ============================================================================
// Tests
// ============================================================================
