//! Time source used for scheduling decisions.
//!
//! Delayed jobs, retry schedules, TTL expiry and failure timestamps all read the
//! time through a [`Clock`]. Production code uses the system clock; tests can
//! swap in a [`MockClock`] to move time forward without sleeping.
//!
//! Executor timeouts are measured on the tokio timer, not on this clock.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Mock clock for controlling time in tests.
///
/// # Examples
///
/// ```rust
/// use taskhive::clock::MockClock;
/// use chrono::Duration;
///
/// let clock = MockClock::new();
/// let initial_time = clock.now();
///
/// clock.advance(Duration::hours(1));
///
/// assert_eq!((clock.now() - initial_time).num_hours(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct MockClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current time.
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(Mutex::new(Utc::now())),
        }
    }

    /// Get the current mock time.
    pub fn now(&self) -> DateTime<Utc> {
        *self
            .current_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the mock time by the given duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self
            .current_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *time += duration;
    }

    /// Set the mock time to a specific instant.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *self
            .current_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

/// The time source shared by the manager, the dispatcher and the stores.
#[derive(Clone, Debug, Default)]
pub enum Clock {
    #[default]
    System,
    Mock(MockClock),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Mock(clock) => clock.now(),
        }
    }

    /// Current time as epoch milliseconds, the unit used for index scores.
    pub fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

impl From<MockClock> for Clock {
    fn from(clock: MockClock) -> Self {
        Clock::Mock(clock)
    }
}
