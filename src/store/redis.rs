//! Redis implementation of the [`JobStore`] contract.
//!
//! Every trait method is a single Redis command, so each one is atomic on the
//! server. In particular `ZREM` reports how many members it removed, which makes
//! [`JobStore::sorted_remove`] a safe claim across processes.

use super::{JobStore, Keys, Order};
use crate::{
    Result, TaskhiveError,
    job::{Job, JobId},
};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Store backed by a Redis server through a multiplexed [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    keys: Keys,
}

impl RedisStore {
    /// Connect to `redis_url`, storing records under `key_prefix`.
    ///
    /// The prefix must match the one the manager uses for its index keys.
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self> {
        info!("Connecting job store to Redis");
        let client = Client::open(redis_url)
            .map_err(|e| TaskhiveError::Config(format!("invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client).await?;
        debug!("Redis job store ready (prefix: '{}')", key_prefix);

        Ok(Self {
            connection,
            keys: Keys::new(key_prefix),
        })
    }

    fn parse_members(members: Vec<String>) -> Vec<JobId> {
        members
            .into_iter()
            .filter_map(|member| match member.parse::<JobId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Ignoring non-UUID sorted set member: {}", member);
                    None
                }
            })
            .collect()
    }
}

fn rank(value: usize) -> isize {
    value.min(isize::MAX as usize) as isize
}

#[async_trait]
impl JobStore for RedisStore {
    async fn put_job(&self, job: &Job, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let job_json = serde_json::to_string(job)?;
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = conn.set_ex(self.keys.job(job.id), job_json, ttl_secs).await?;
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let mut conn = self.connection.clone();
        let job_json: Option<String> = conn.get(self.keys.job(job_id)).await?;

        match job_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_job(&self, job_id: JobId) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(self.keys.job(job_id)).await?;
        Ok(removed > 0)
    }

    async fn sorted_add(&self, key: &str, member: JobId, score: i64) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.zadd(key, member.to_string(), score).await?;
        Ok(())
    }

    async fn sorted_remove(&self, key: &str, member: JobId) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.zrem(key, member.to_string()).await?;
        Ok(removed > 0)
    }

    async fn sorted_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
        order: Order,
    ) -> Result<Vec<JobId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let start = rank(offset);
        let stop = rank(offset.saturating_add(limit - 1));

        let members: Vec<String> = match order {
            Order::Ascending => conn.zrange(key, start, stop).await?,
            Order::Descending => conn.zrevrange(key, start, stop).await?,
        };
        Ok(Self::parse_members(members))
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<JobId>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .zrangebyscore_limit(key, "-inf", max_score, 0, rank(limit))
            .await?;
        Ok(Self::parse_members(members))
    }

    async fn sorted_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = conn.zcard(key).await?;
        Ok(len)
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut conn = self.connection.clone();
        let value: i64 = conn.incr(key, by).await?;
        Ok(value)
    }

    async fn counter(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }
}
