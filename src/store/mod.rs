//! Persistence contract for job records and queue indices.
//!
//! The runtime needs very little from its storage: keyed job records with a
//! TTL, integer-scored sorted sets for the per-queue indices, and scalar
//! counters. The [`JobStore`] trait captures exactly that, so a key/sorted-set
//! server like Redis maps onto it one command per method.
//!
//! [`JobStore::sorted_remove`] is the claim primitive used everywhere a job
//! moves between indices: it reports whether *this* call removed the member,
//! and only the caller that removed it may act on the job.

use crate::{
    Result,
    job::{Job, JobId},
};
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Direction for range reads over a sorted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Lowest score first.
    Ascending,
    /// Highest score first.
    Descending,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    // Job records
    /// Write a job record, (re)setting its time-to-live.
    async fn put_job(&self, job: &Job, ttl: Duration) -> Result<()>;
    /// Read a job record. Expired records read as `None`.
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>>;
    /// Delete a job record. Returns whether a record existed.
    async fn delete_job(&self, job_id: JobId) -> Result<bool>;

    // Sorted sets
    /// Insert or re-score a member.
    async fn sorted_add(&self, key: &str, member: JobId, score: i64) -> Result<()>;
    /// Remove a member. Returns `true` only for the caller that removed it.
    async fn sorted_remove(&self, key: &str, member: JobId) -> Result<bool>;
    /// Members by rank, starting at `offset`, at most `limit` of them.
    async fn sorted_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
        order: Order,
    ) -> Result<Vec<JobId>>;
    /// Members with `score <= max_score`, lowest first, at most `limit` of them.
    async fn sorted_range_by_score(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<JobId>>;
    /// Number of members.
    async fn sorted_len(&self, key: &str) -> Result<u64>;

    // Counters
    /// Add `by` to a counter and return the new value.
    async fn increment(&self, key: &str, by: i64) -> Result<i64>;
    /// Current value of a counter, zero when unset.
    async fn counter(&self, key: &str) -> Result<i64>;
}

/// Key layout of the persisted structures.
///
/// With an empty prefix the layout is:
///
/// ```text
/// job:<id>                      serialized job record
/// queue:<name>:waiting          score = priority * 2^40 + sequence
/// queue:<name>:delayed          score = scheduled_for (epoch ms)
/// queue:<name>:active           score = started_at (epoch ms)
/// queue:<name>:failed           score = failed_at (epoch ms)
/// queue:<name>:completed:count  counter
/// queue:<name>:sequence         counter
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = if prefix.is_empty() || prefix.ends_with(':') {
            prefix
        } else {
            format!("{}:", prefix)
        };
        Self { prefix }
    }

    pub fn job(&self, job_id: JobId) -> String {
        format!("{}job:{}", self.prefix, job_id)
    }

    pub fn waiting(&self, queue_name: &str) -> String {
        self.queue(queue_name, "waiting")
    }

    pub fn delayed(&self, queue_name: &str) -> String {
        self.queue(queue_name, "delayed")
    }

    pub fn active(&self, queue_name: &str) -> String {
        self.queue(queue_name, "active")
    }

    pub fn failed(&self, queue_name: &str) -> String {
        self.queue(queue_name, "failed")
    }

    pub fn completed_count(&self, queue_name: &str) -> String {
        self.queue(queue_name, "completed:count")
    }

    pub fn sequence(&self, queue_name: &str) -> String {
        self.queue(queue_name, "sequence")
    }

    fn queue(&self, queue_name: &str, suffix: &str) -> String {
        format!("{}queue:{}:{}", self.prefix, queue_name, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_layout() {
        let keys = Keys::default();
        let id = Uuid::nil();

        assert_eq!(keys.job(id), format!("job:{}", id));
        assert_eq!(keys.waiting("email"), "queue:email:waiting");
        assert_eq!(keys.delayed("email"), "queue:email:delayed");
        assert_eq!(keys.active("email"), "queue:email:active");
        assert_eq!(keys.failed("email"), "queue:email:failed");
        assert_eq!(keys.completed_count("email"), "queue:email:completed:count");
    }

    #[test]
    fn test_prefixed_layout() {
        assert_eq!(Keys::new("app").waiting("email"), "app:queue:email:waiting");
        assert_eq!(Keys::new("app:").failed("email"), "app:queue:email:failed");
    }
}
