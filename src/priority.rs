//! Job priorities and the ordering of the waiting index.
//!
//! Priorities run from **1 (highest)** to **10 (lowest)**. The waiting index of
//! every queue is a sorted set whose score combines the priority with a
//! per-queue enqueue sequence:
//!
//! ```text
//! score = priority * 2^40 + (sequence mod 2^40)
//! ```
//!
//! so the lowest score is always the most urgent job, and jobs of equal priority
//! are served in the order they entered the waiting index.

use crate::{Result, TaskhiveError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits of a waiting score reserved for the enqueue sequence.
pub const SEQUENCE_BITS: u32 = 40;

const SEQUENCE_MASK: i64 = (1_i64 << SEQUENCE_BITS) - 1;

/// Priority of a job within its queue. Lower numbers are served first.
///
/// # Examples
///
/// ```rust
/// use taskhive::JobPriority;
///
/// let urgent = JobPriority::new(1).unwrap();
/// assert!(urgent < JobPriority::default());
/// assert!(JobPriority::new(11).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct JobPriority(u8);

impl JobPriority {
    pub const HIGHEST: JobPriority = JobPriority(1);
    pub const LOWEST: JobPriority = JobPriority(10);
    pub const DEFAULT: JobPriority = JobPriority(5);

    /// Create a priority, rejecting values outside `1..=10`.
    pub fn new(value: u8) -> Result<Self> {
        if (Self::HIGHEST.0..=Self::LOWEST.0).contains(&value) {
            Ok(JobPriority(value))
        } else {
            Err(TaskhiveError::validation(format!(
                "priority must be between {} and {}, got {}",
                Self::HIGHEST.0,
                Self::LOWEST.0,
                value
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for JobPriority {
    type Error = TaskhiveError;

    fn try_from(value: u8) -> Result<Self> {
        JobPriority::new(value)
    }
}

impl From<JobPriority> for u8 {
    fn from(priority: JobPriority) -> Self {
        priority.0
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Score of a job in the waiting index.
pub fn waiting_score(priority: JobPriority, sequence: i64) -> i64 {
    ((priority.0 as i64) << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bounds() {
        assert!(JobPriority::new(0).is_err());
        assert!(JobPriority::new(1).is_ok());
        assert!(JobPriority::new(10).is_ok());
        assert!(matches!(
            JobPriority::new(11),
            Err(TaskhiveError::Validation { .. })
        ));
    }

    #[test]
    fn test_priority_serde() {
        let priority = JobPriority::new(3).unwrap();
        assert_eq!(serde_json::to_string(&priority).unwrap(), "3");

        let parsed: JobPriority = serde_json::from_str("7").unwrap();
        assert_eq!(parsed.value(), 7);

        assert!(serde_json::from_str::<JobPriority>("42").is_err());
    }

    #[test]
    fn test_waiting_score_orders_by_priority_first() {
        let high_late = waiting_score(JobPriority::HIGHEST, 1_000);
        let low_early = waiting_score(JobPriority::new(9).unwrap(), 1);
        assert!(high_late < low_early);
    }

    #[test]
    fn test_waiting_score_fifo_within_priority() {
        let first = waiting_score(JobPriority::DEFAULT, 10);
        let second = waiting_score(JobPriority::DEFAULT, 11);
        assert!(first < second);
        assert!(second < waiting_score(JobPriority::new(6).unwrap(), 0));
    }

    #[test]
    fn test_waiting_score_fits_f64_precision() {
        // Redis stores scores as doubles; the largest score must stay exact.
        let max = waiting_score(JobPriority::LOWEST, SEQUENCE_MASK);
        assert_eq!(max as f64 as i64, max);
    }
}
