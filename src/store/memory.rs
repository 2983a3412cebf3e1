//! In-memory implementation of the [`JobStore`] contract.
//!
//! `MemoryStore` keeps everything in process, which makes it the default for
//! tests, development and single-process deployments that can afford to lose
//! queued work on restart.
//!
//! # Examples
//!
//! ```rust
//! use taskhive::store::{JobStore, MemoryStore, Order};
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let id = Uuid::new_v4();
//!
//! store.sorted_add("queue:email:waiting", id, 10).await?;
//! assert!(store.sorted_remove("queue:email:waiting", id).await?);
//! // A second claim of the same member fails.
//! assert!(!store.sorted_remove("queue:email:waiting", id).await?);
//! # Ok(())
//! # }
//! ```

use super::{JobStore, Order};
use crate::{
    Result,
    clock::Clock,
    job::{Job, JobId, checked_after},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};
use tokio::sync::RwLock;

/// A sorted set of job ids keyed by integer score.
#[derive(Debug, Default)]
struct SortedSet {
    by_score: BTreeSet<(i64, JobId)>,
    scores: HashMap<JobId, i64>,
}

impl SortedSet {
    fn insert(&mut self, member: JobId, score: i64) {
        if let Some(old) = self.scores.insert(member, score) {
            self.by_score.remove(&(old, member));
        }
        self.by_score.insert((score, member));
    }

    fn remove(&mut self, member: JobId) -> bool {
        match self.scores.remove(&member) {
            Some(score) => self.by_score.remove(&(score, member)),
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug)]
struct StoredJob {
    job: Job,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobId, StoredJob>,
    sorted: HashMap<String, SortedSet>,
    counters: HashMap<String, i64>,
}

/// Process-local store backed by hash maps and B-tree sets.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    clock: Clock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given clock for TTL decisions.
    pub fn with_clock(clock: impl Into<Clock>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            clock: clock.into(),
        }
    }

    /// Drop every record whose TTL has elapsed. Returns the number removed.
    ///
    /// Index entries are left in place; the dispatcher discards ids whose
    /// record no longer exists.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, stored| stored.expires_at > now);
        before - state.jobs.len()
    }

    /// Number of job records currently held, expired ones included.
    pub async fn job_count(&self) -> usize {
        self.state.read().await.jobs.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put_job(&self, job: &Job, ttl: Duration) -> Result<()> {
        let expires_at = checked_after(self.clock.now(), ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = self.state.write().await;
        state.jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let now = self.clock.now();
        let state = self.state.read().await;
        Ok(state
            .jobs
            .get(&job_id)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.job.clone()))
    }

    async fn delete_job(&self, job_id: JobId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.jobs.remove(&job_id).is_some())
    }

    async fn sorted_add(&self, key: &str, member: JobId, score: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .sorted
            .entry(key.to_string())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    async fn sorted_remove(&self, key: &str, member: JobId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .sorted
            .get_mut(key)
            .is_some_and(|set| set.remove(member)))
    }

    async fn sorted_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
        order: Order,
    ) -> Result<Vec<JobId>> {
        let state = self.state.read().await;
        let Some(set) = state.sorted.get(key) else {
            return Ok(Vec::new());
        };

        let members = match order {
            Order::Ascending => set
                .by_score
                .iter()
                .skip(offset)
                .take(limit)
                .map(|(_, id)| *id)
                .collect(),
            Order::Descending => set
                .by_score
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .map(|(_, id)| *id)
                .collect(),
        };
        Ok(members)
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<JobId>> {
        let state = self.state.read().await;
        Ok(state
            .sorted
            .get(key)
            .map(|set| {
                set.by_score
                    .iter()
                    .take_while(|(score, _)| *score <= max_score)
                    .take(limit)
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sorted_len(&self, key: &str) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.sorted.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut state = self.state.write().await;
        let value = state.counters.entry(key.to_string()).or_insert(0);
        *value += by;
        Ok(*value)
    }

    async fn counter(&self, key: &str) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.counters.get(key).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::MockClock, job::JobOptions};
    use serde_json::json;
    use uuid::Uuid;

    fn sample_job() -> Job {
        Job::new("email", "welcome", json!({}), JobOptions::new(), Utc::now())
    }

    #[tokio::test]
    async fn test_job_record_lifecycle() {
        let store = MemoryStore::new();
        let job = sample_job();

        store.put_job(&job, Duration::from_secs(60)).await.unwrap();
        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);

        assert!(store.delete_job(job.id).await.unwrap());
        assert!(!store.delete_job(job.id).await.unwrap());
        assert!(store.get_job(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry_hides_and_purges_records() {
        let clock = MockClock::new();
        let store = MemoryStore::with_clock(clock.clone());
        let job = sample_job();

        store.put_job(&job, Duration::from_secs(10)).await.unwrap();
        clock.advance(chrono::Duration::seconds(9));
        assert!(store.get_job(job.id).await.unwrap().is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(store.get_job(job.id).await.unwrap().is_none());
        assert_eq!(store.job_count().await, 1);

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_sorted_set_ordering() {
        let store = MemoryStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.sorted_add("set", a, 30).await.unwrap();
        store.sorted_add("set", b, 10).await.unwrap();
        store.sorted_add("set", c, 20).await.unwrap();

        let asc = store.sorted_range("set", 0, 10, Order::Ascending).await.unwrap();
        assert_eq!(asc, vec![b, c, a]);

        let desc = store.sorted_range("set", 0, 2, Order::Descending).await.unwrap();
        assert_eq!(desc, vec![a, c]);

        let skipped = store.sorted_range("set", 1, 10, Order::Ascending).await.unwrap();
        assert_eq!(skipped, vec![c, a]);

        let due = store.sorted_range_by_score("set", 20, 10).await.unwrap();
        assert_eq!(due, vec![b, c]);
    }

    #[tokio::test]
    async fn test_sorted_add_rescores_member() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        store.sorted_add("set", id, 5).await.unwrap();
        store.sorted_add("set", id, 50).await.unwrap();

        assert_eq!(store.sorted_len("set").await.unwrap(), 1);
        assert!(store.sorted_range_by_score("set", 10, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sorted_remove_claims_once() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        store.sorted_add("set", id, 1).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.sorted_remove("set", id).await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_counters() {
        let store = MemoryStore::new();
        assert_eq!(store.counter("c").await.unwrap(), 0);
        assert_eq!(store.increment("c", 1).await.unwrap(), 1);
        assert_eq!(store.increment("c", 2).await.unwrap(), 3);
        assert_eq!(store.counter("c").await.unwrap(), 3);
    }
}
