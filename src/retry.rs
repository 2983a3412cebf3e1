//! Backoff strategies applied between retry attempts.
//!
//! When a job's processor fails and the job still has attempts left, the
//! executor asks the job's [`BackoffStrategy`] how long to wait before the job
//! becomes eligible again. The attempt number passed in is the attempt that
//! just failed (1-based), so the first retry waits exactly the base delay.
//!
//! # Strategies
//!
//! - [`Fixed`](BackoffStrategy::Fixed) - Constant delay between retries
//! - [`Exponential`](BackoffStrategy::Exponential) - `base * 2^(attempt - 1)`, optionally capped
//!
//! Both can carry an optional [`JitterType`] to spread out retries of many jobs
//! failing at once. Without jitter the computed delays are exact.
//!
//! # Examples
//!
//! ```rust
//! use taskhive::retry::BackoffStrategy;
//! use std::time::Duration;
//!
//! let backoff = BackoffStrategy::exponential(Duration::from_millis(1000), None);
//!
//! assert_eq!(backoff.calculate_delay(1), Duration::from_millis(1000));
//! assert_eq!(backoff.calculate_delay(2), Duration::from_millis(2000));
//! assert_eq!(backoff.calculate_delay(3), Duration::from_millis(4000));
//! ```

use crate::{
    Result, TaskhiveError,
    job::{MAX_DELAY, duration_millis, option_duration_millis},
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of jitter that can be applied to retry delays.
///
/// # Examples
///
/// ```rust
/// use taskhive::retry::JitterType;
/// use std::time::Duration;
///
/// // Add ±2 seconds of randomness
/// let additive = JitterType::Additive(Duration::from_secs(2));
///
/// // Add ±20% randomness to the delay
/// let multiplicative = JitterType::Multiplicative(0.2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JitterType {
    /// Add or subtract a random duration between 0 and the specified value.
    Additive(#[serde(with = "duration_millis")] Duration),

    /// Multiply the delay by a random factor in `1 ± factor`.
    Multiplicative(f64),
}

impl JitterType {
    /// Apply jitter to a given delay. The result never goes below zero.
    ///
    /// ```rust
    /// use taskhive::retry::JitterType;
    /// use std::time::Duration;
    ///
    /// let jitter = JitterType::Additive(Duration::from_secs(5));
    /// let jittered = jitter.apply(Duration::from_secs(30));
    ///
    /// assert!(jittered >= Duration::from_secs(25));
    /// assert!(jittered <= Duration::from_secs(35));
    /// ```
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();

        match self {
            JitterType::Additive(jitter_amount) => {
                let jitter_millis = rng.gen_range(0..=jitter_amount.as_millis() as u64);
                let jitter = Duration::from_millis(jitter_millis);

                if rng.gen_bool(0.5) {
                    delay.saturating_add(jitter)
                } else {
                    delay.saturating_sub(jitter)
                }
            }
            JitterType::Multiplicative(factor) => {
                let factor = factor.abs().min(1.0);
                let jitter_factor = rng.gen_range((1.0 - factor)..=(1.0 + factor));
                let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
                Duration::from_millis(jittered_millis)
            }
        }
    }
}

/// Delay policy between retry attempts of a job.
///
/// Stored as part of the job options, so it travels with the job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    ///
    /// ```rust
    /// use taskhive::retry::BackoffStrategy;
    /// use std::time::Duration;
    ///
    /// let strategy = BackoffStrategy::fixed(Duration::from_millis(100));
    /// assert_eq!(strategy.calculate_delay(1), Duration::from_millis(100));
    /// assert_eq!(strategy.calculate_delay(5), Duration::from_millis(100));
    /// ```
    Fixed {
        #[serde(with = "duration_millis")]
        delay: Duration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jitter: Option<JitterType>,
    },

    /// Doubling delay: `base * 2^(attempt - 1)`, capped at `max_delay` when set.
    Exponential {
        #[serde(with = "duration_millis")]
        base: Duration,
        #[serde(
            default,
            with = "option_duration_millis",
            skip_serializing_if = "Option::is_none"
        )]
        max_delay: Option<Duration>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jitter: Option<JitterType>,
    },
}

impl BackoffStrategy {
    /// Calculate the delay before the next attempt.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed { delay, jitter } => apply_jitter(*delay, jitter.as_ref()),

            BackoffStrategy::Exponential {
                base,
                max_delay,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(63);
                let factor = 1_u64.checked_shl(exponent).unwrap_or(u64::MAX);
                let base_millis = base.as_millis().min(u64::MAX as u128) as u64;
                let delay = Duration::from_millis(base_millis.saturating_mul(factor));

                let capped_delay = match max_delay {
                    Some(max) => delay.min(*max),
                    None => delay,
                };

                apply_jitter(capped_delay, jitter.as_ref())
            }
        }
    }

    /// Reject delays longer than [`MAX_DELAY`] and non-finite jitter factors.
    ///
    /// An uncapped exponential strategy can still outgrow the schedulable
    /// range after enough attempts; the executor fails such a job instead of
    /// scheduling it.
    pub fn validate(&self) -> Result<()> {
        let (delays, jitter) = match self {
            BackoffStrategy::Fixed { delay, jitter } => (vec![*delay], jitter),
            BackoffStrategy::Exponential {
                base,
                max_delay,
                jitter,
            } => (std::iter::once(*base).chain(*max_delay).collect(), jitter),
        };

        if delays.iter().any(|delay| *delay > MAX_DELAY) {
            return Err(TaskhiveError::validation(format!(
                "backoff delays must not exceed {:?}",
                MAX_DELAY
            )));
        }

        match jitter {
            Some(JitterType::Additive(amount)) if *amount > MAX_DELAY => Err(
                TaskhiveError::validation(format!("jitter must not exceed {:?}", MAX_DELAY)),
            ),
            Some(JitterType::Multiplicative(factor)) if !factor.is_finite() => Err(
                TaskhiveError::validation("jitter factor must be a finite number"),
            ),
            _ => Ok(()),
        }
    }

    /// Create a fixed delay strategy.
    pub fn fixed(delay: Duration) -> Self {
        BackoffStrategy::Fixed {
            delay,
            jitter: None,
        }
    }

    /// Create an exponential strategy with an optional cap.
    pub fn exponential(base: Duration, max_delay: Option<Duration>) -> Self {
        BackoffStrategy::Exponential {
            base,
            max_delay,
            jitter: None,
        }
    }

    /// Attach jitter to this strategy.
    pub fn with_jitter(self, jitter: JitterType) -> Self {
        match self {
            BackoffStrategy::Fixed { delay, .. } => BackoffStrategy::Fixed {
                delay,
                jitter: Some(jitter),
            },
            BackoffStrategy::Exponential {
                base, max_delay, ..
            } => BackoffStrategy::Exponential {
                base,
                max_delay,
                jitter: Some(jitter),
            },
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::exponential(Duration::from_secs(1), Some(Duration::from_secs(300)))
    }
}

fn apply_jitter(delay: Duration, jitter: Option<&JitterType>) -> Duration {
    match jitter {
        Some(jitter) => jitter.apply(delay),
        None => delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let strategy = BackoffStrategy::fixed(Duration::from_millis(100));
        for attempt in 1..=5 {
            assert_eq!(strategy.calculate_delay(attempt), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_fixed_backoff_allows_zero() {
        let strategy = BackoffStrategy::fixed(Duration::ZERO);
        assert_eq!(strategy.calculate_delay(1), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let strategy = BackoffStrategy::exponential(Duration::from_millis(1000), None);
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_validate_bounds_delays() {
        assert!(BackoffStrategy::default().validate().is_ok());
        assert!(BackoffStrategy::fixed(MAX_DELAY).validate().is_ok());
        assert!(BackoffStrategy::fixed(Duration::MAX).validate().is_err());
        assert!(
            BackoffStrategy::exponential(Duration::from_secs(1), Some(Duration::MAX))
                .validate()
                .is_err()
        );
        assert!(
            BackoffStrategy::fixed(Duration::from_secs(1))
                .with_jitter(JitterType::Multiplicative(f64::NAN))
                .validate()
                .is_err()
        );
        assert!(
            BackoffStrategy::fixed(Duration::from_secs(1))
                .with_jitter(JitterType::Additive(Duration::MAX))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_exponential_backoff_cap() {
        let strategy = BackoffStrategy::exponential(
            Duration::from_millis(1000),
            Some(Duration::from_millis(3000)),
        );
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(3000));
        assert_eq!(strategy.calculate_delay(30), Duration::from_millis(3000));
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let strategy = BackoffStrategy::exponential(Duration::from_secs(1), None);
        // Large attempt counts must not overflow or panic.
        assert!(strategy.calculate_delay(200) >= Duration::from_secs(1));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let strategy = BackoffStrategy::exponential(Duration::from_millis(500), None);
        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn test_multiplicative_jitter_bounds() {
        let strategy = BackoffStrategy::fixed(Duration::from_millis(1000))
            .with_jitter(JitterType::Multiplicative(0.1));

        for _ in 0..100 {
            let delay = strategy.calculate_delay(1);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_backoff_serde_shape() {
        let strategy = BackoffStrategy::exponential(
            Duration::from_millis(1000),
            Some(Duration::from_millis(60_000)),
        );
        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["type"], "exponential");
        assert_eq!(json["base"], 1000);
        assert_eq!(json["max_delay"], 60_000);

        let parsed: BackoffStrategy =
            serde_json::from_str(r#"{"type":"fixed","delay":250}"#).unwrap();
        assert_eq!(parsed, BackoffStrategy::fixed(Duration::from_millis(250)));
    }
}
