//! Shared provider traits for dependency injection.
//!
//! This module contains common traits used across the codebase to enable
//! testability through dependency injection. By abstracting the wall clock
//! behind a trait, the learning engine's time windows can be tested with a
//! fixed instant.

use chrono::{DateTime, Utc};

/// Trait for providing timestamps.
///
/// This abstraction enables deterministic testing of time-dependent behavior
/// by allowing injection of mock time providers.
///
/// # Example
///
/// ```
/// use codesmith::providers::{TimeProvider, SystemTimeProvider};
///
/// let provider = SystemTimeProvider;
/// let timestamp = provider.now();
/// assert!(timestamp.timestamp() > 0);
/// ```
pub trait TimeProvider: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Default time provider using system time.
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time provider frozen at a single instant.
///
/// Used by tests and by callers replaying historical data.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeProvider(pub DateTime<Utc>);

impl TimeProvider for FixedTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_time_provider_never_moves() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let provider = FixedTimeProvider(instant);

        assert_eq!(provider.now(), instant);
        assert_eq!(provider.now(), provider.now());
    }

    #[test]
    fn test_system_time_provider_is_recent() {
        let before = Utc::now();
        let now = SystemTimeProvider.now();
        assert!(now >= before);
    }
}
