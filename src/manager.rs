//! The [`QueueManager`] handle: job submission, the admin API and the
//! dispatcher lifecycle.
//!
//! A manager owns one [`JobStore`], one [`QueueRegistry`], a [`Clock`], the
//! configuration and the optional statistics sinks. It is a cheap `Clone`
//! handle over shared state, so request handlers, processors and the
//! dispatcher task can all hold one. Several independent managers can live in
//! the same process.
//!
//! # Examples
//!
//! ```rust
//! use taskhive::{Job, JobOptions, QueueManager, TaskhiveConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> taskhive::Result<()> {
//! let manager = QueueManager::in_memory(TaskhiveConfig::default());
//!
//! manager.create_queue("email", 2).await?;
//! manager
//!     .register_processor("email", "welcome", |job: Job, _progress| async move {
//!         Ok(json!({ "sent_to": job.payload["to"] }))
//!     })
//!     .await?;
//!
//! let id = manager
//!     .add_job("email", "welcome", json!({ "to": "ada@example.com" }), JobOptions::new())
//!     .await?;
//!
//! manager.tick().await;
//! manager.wait_idle(Duration::from_secs(1)).await;
//!
//! let job = manager.get_job(id).await?;
//! assert_eq!(job.result, Some(json!({ "sent_to": "ada@example.com" })));
//! # Ok(())
//! # }
//! ```

use crate::{
    Result, TaskhiveError,
    clock::Clock,
    config::TaskhiveConfig,
    dispatcher::{self, TickReport},
    job::{Job, JobId, JobOptions, JobStatus},
    priority::{JobPriority, waiting_score},
    registry::{ProgressReporter, ProgressSink, QueueRegistry},
    stats::{JobEvent, QueueStats, StatisticsCollector},
    store::{JobStore, Keys, MemoryStore, Order},
};
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::PrometheusMetricsCollector;

const JOB_LOCK_STRIPES: usize = 64;

/// Page size used when sweeping a whole index.
const SWEEP_BATCH: usize = 500;

/// A job to add through [`QueueManager::add_bulk`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
}

impl NewJob {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// What to do with a job record after a locked update.
pub(crate) enum RecordUpdate {
    Save,
    Delete,
}

struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Shared state behind every [`QueueManager`] clone.
pub(crate) struct Inner {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: QueueRegistry,
    pub(crate) keys: Keys,
    pub(crate) clock: Clock,
    pub(crate) config: TaskhiveConfig,
    stats: Option<Arc<dyn StatisticsCollector>>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<Arc<PrometheusMetricsCollector>>,
    job_locks: Vec<Mutex<()>>,
    /// Held for the duration of a dispatcher tick.
    pub(crate) tick_lock: Mutex<()>,
    pub(crate) in_flight: Mutex<JoinSet<()>>,
    /// Number of executions spawned and not yet finished.
    pub(crate) running: watch::Sender<usize>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
}

impl Inner {
    fn job_lock(&self, job_id: JobId) -> &Mutex<()> {
        &self.job_locks[(job_id.as_u128() % JOB_LOCK_STRIPES as u128) as usize]
    }

    /// Read-modify-write a job record under its stripe lock.
    pub(crate) async fn update_job<F>(&self, job_id: JobId, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let _guard = self.job_lock(job_id).lock().await;
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| not_found(job_id))?;

        f(&mut job)?;
        self.store.put_job(&job, self.config.jobs.ttl).await?;
        Ok(job)
    }

    /// Finish an active job: apply `f` to its record, file it in `index`
    /// (key and score) when given, then release its active slot. All three
    /// steps run under the job's lock, so promotion and admin retries cannot
    /// pick the job up before its slot is free.
    pub(crate) async fn settle_job<F>(
        &self,
        job_id: JobId,
        index: Option<(String, i64)>,
        f: F,
    ) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<RecordUpdate>,
    {
        let _guard = self.job_lock(job_id).lock().await;
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| not_found(job_id))?;

        match f(&mut job)? {
            RecordUpdate::Save => self.store.put_job(&job, self.config.jobs.ttl).await?,
            RecordUpdate::Delete => {
                self.store.delete_job(job_id).await?;
            }
        }
        if let Some((key, score)) = index {
            self.store.sorted_add(&key, job_id, score).await?;
        }
        self.store
            .sorted_remove(&self.keys.active(&job.queue_name), job_id)
            .await?;
        Ok(job)
    }

    /// Allocate the next FIFO sequence number of a queue and build the
    /// waiting-index score for it.
    pub(crate) async fn next_waiting_score(&self, queue_name: &str, priority: u8) -> Result<i64> {
        let priority = JobPriority::new(priority).unwrap_or_default();
        let sequence = self.store.increment(&self.keys.sequence(queue_name), 1).await?;
        Ok(waiting_score(priority, sequence))
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        self.store.put_job(job, self.config.jobs.ttl).await?;
        match job.scheduled_for {
            Some(at) if job.status == JobStatus::Delayed => {
                self.store
                    .sorted_add(&self.keys.delayed(&job.queue_name), job.id, at.timestamp_millis())
                    .await
            }
            _ => {
                let score = self
                    .next_waiting_score(&job.queue_name, job.options.priority)
                    .await?;
                self.store
                    .sorted_add(&self.keys.waiting(&job.queue_name), job.id, score)
                    .await
            }
        }
    }

    pub(crate) async fn record_event(&self, event: JobEvent) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_job_event(&event);
        }

        if let Some(stats) = &self.stats {
            if let Err(e) = stats.record_event(event).await {
                warn!("Failed to record statistics event: {}", e);
            }
        }
    }

    pub(crate) async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let config = self
            .registry
            .config(queue_name)
            .await
            .ok_or_else(|| TaskhiveError::QueueNotFound {
                name: queue_name.to_string(),
            })?;

        let completed = self
            .store
            .counter(&self.keys.completed_count(queue_name))
            .await?;

        Ok(QueueStats {
            queue_name: config.name,
            waiting: self.store.sorted_len(&self.keys.waiting(queue_name)).await?,
            active: self.store.sorted_len(&self.keys.active(queue_name)).await?,
            delayed: self.store.sorted_len(&self.keys.delayed(queue_name)).await?,
            failed: self.store.sorted_len(&self.keys.failed(queue_name)).await?,
            completed: completed.max(0) as u64,
            concurrency: config.concurrency,
            paused: config.is_paused,
            missing_processors: self.registry.missing_processors(queue_name).await,
        })
    }

    /// Put a job whose execution was aborted back into the index its record
    /// calls for. Active or waiting records go to the delayed index, due now,
    /// so the next promotion hands them out again.
    pub(crate) async fn restore_index(&self, job_id: JobId) -> Result<()> {
        let _guard = self.job_lock(job_id).lock().await;
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(());
        };

        let now_ms = self.clock.now_millis();
        let (key, score) = match job.status {
            JobStatus::Completed => return Ok(()),
            JobStatus::Failed => (
                self.keys.failed(&job.queue_name),
                job.failed_at.map_or(now_ms, |at| at.timestamp_millis()),
            ),
            JobStatus::Delayed => (
                self.keys.delayed(&job.queue_name),
                job.scheduled_for.map_or(now_ms, |at| at.timestamp_millis()),
            ),
            JobStatus::Active | JobStatus::Waiting => (self.keys.delayed(&job.queue_name), now_ms),
        };
        self.store.sorted_add(&key, job_id, score).await
    }

    /// Claim and delete every member of an index. Returns the number removed.
    async fn sweep_index(&self, key: &str) -> Result<u64> {
        let mut removed = 0;
        loop {
            let ids = self
                .store
                .sorted_range(key, 0, SWEEP_BATCH, Order::Ascending)
                .await?;
            if ids.is_empty() {
                return Ok(removed);
            }

            for job_id in ids {
                if !self.store.sorted_remove(key, job_id).await? {
                    continue;
                }
                let _guard = self.job_lock(job_id).lock().await;
                self.store.delete_job(job_id).await?;
                removed += 1;
            }
        }
    }
}

#[async_trait::async_trait]
impl ProgressSink for Inner {
    async fn report(&self, job_id: JobId, progress: u8) -> Result<()> {
        self.update_job(job_id, |job| {
            if job.status != JobStatus::Active {
                return Err(TaskhiveError::validation(format!(
                    "cannot report progress for job {} in status {}",
                    job_id, job.status
                )));
            }
            job.progress = progress;
            Ok(())
        })
        .await
        .map(|_| ())
    }
}

fn not_found(job_id: JobId) -> TaskhiveError {
    TaskhiveError::JobNotFound {
        id: job_id.to_string(),
    }
}

/// Builder for a [`QueueManager`].
pub struct QueueManagerBuilder {
    store: Arc<dyn JobStore>,
    config: TaskhiveConfig,
    clock: Clock,
    stats: Option<Arc<dyn StatisticsCollector>>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<PrometheusMetricsCollector>>,
}

impl QueueManagerBuilder {
    pub fn config(mut self, config: TaskhiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for scheduling, promotion and failure timestamps. A
    /// [`MemoryStore`] passed to the builder should share the same clock.
    pub fn clock(mut self, clock: impl Into<Clock>) -> Self {
        self.clock = clock.into();
        self
    }

    pub fn stats_collector(mut self, collector: Arc<dyn StatisticsCollector>) -> Self {
        self.stats = Some(collector);
        self
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(mut self, metrics: Arc<PrometheusMetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> QueueManager {
        let job_locks = (0..JOB_LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        QueueManager {
            inner: Arc::new(Inner {
                store: self.store,
                registry: QueueRegistry::new(self.config.dispatcher.default_concurrency),
                keys: Keys::new(self.config.store.key_prefix.clone()),
                clock: self.clock,
                config: self.config,
                stats: self.stats,
                #[cfg(feature = "metrics")]
                metrics: self.metrics,
                job_locks,
                tick_lock: Mutex::new(()),
                in_flight: Mutex::new(JoinSet::new()),
                running: watch::Sender::new(0),
                dispatcher: Mutex::new(None),
            }),
        }
    }
}

/// Handle to a job runtime.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    pub fn builder(store: Arc<dyn JobStore>) -> QueueManagerBuilder {
        QueueManagerBuilder {
            store,
            config: TaskhiveConfig::default(),
            clock: Clock::System,
            stats: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    pub fn new(store: Arc<dyn JobStore>, config: TaskhiveConfig) -> Self {
        Self::builder(store).config(config).build()
    }

    /// A manager over a fresh [`MemoryStore`].
    pub fn in_memory(config: TaskhiveConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Build a manager from configuration alone: Redis when `store.redis_url`
    /// is set, in-memory otherwise.
    pub async fn from_config(config: TaskhiveConfig) -> Result<Self> {
        match &config.store.redis_url {
            #[cfg(feature = "redis")]
            Some(url) => {
                let store = crate::store::RedisStore::connect(url, &config.store.key_prefix).await?;
                Ok(Self::new(Arc::new(store), config))
            }
            #[cfg(not(feature = "redis"))]
            Some(_) => Err(TaskhiveError::Config(
                "store.redis_url is set but the `redis` feature is disabled".to_string(),
            )),
            None => Ok(Self::in_memory(config)),
        }
    }

    pub fn config(&self) -> &TaskhiveConfig {
        &self.inner.config
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<&Arc<PrometheusMetricsCollector>> {
        self.inner.metrics.as_ref()
    }

    // Queue registry

    /// Create a queue. Creating an existing queue again is a no-op.
    pub async fn create_queue(&self, name: &str, concurrency: usize) -> Result<()> {
        self.inner.registry.create_queue(name, concurrency).await
    }

    /// Register a processor for `(queue_name, job_name)`.
    ///
    /// The processor receives the job with its payload decoded into `T` and a
    /// [`ProgressReporter`]. Its `Ok` value is serialized and stored as the
    /// job result; an `Err` (or a payload that does not decode into `T`) sends
    /// the job down the retry path. The queue is created with the configured
    /// default concurrency when it does not exist.
    pub async fn register_processor<T, R, F, Fut>(
        &self,
        queue_name: &str,
        job_name: &str,
        processor: F,
    ) -> Result<()>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Job<T>, ProgressReporter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.inner
            .registry
            .register_processor(queue_name, job_name, processor)
            .await
    }

    /// Stop dispatching new jobs from a queue. Running jobs are not affected
    /// and delayed jobs are not promoted while paused.
    pub async fn pause_queue(&self, queue_name: &str) -> Result<()> {
        self.inner.registry.set_paused(queue_name, true).await?;
        info!("Paused queue '{}'", queue_name);
        Ok(())
    }

    pub async fn resume_queue(&self, queue_name: &str) -> Result<()> {
        self.inner.registry.set_paused(queue_name, false).await?;
        info!("Resumed queue '{}'", queue_name);
        Ok(())
    }

    // Jobs

    /// Add a job to an existing queue and return its id.
    pub async fn add_job<P: Serialize>(
        &self,
        queue_name: &str,
        job_name: &str,
        payload: P,
        options: JobOptions,
    ) -> Result<JobId> {
        self.ensure_queue(queue_name).await?;
        validate_new_job(job_name, &options)?;

        let payload = serde_json::to_value(payload)?;
        let job = Job::new(queue_name, job_name, payload, options, self.inner.clock.now());
        self.inner.enqueue(&job).await?;

        debug!(
            "Added job {} ('{}') to queue '{}' as {}",
            job.id, job_name, queue_name, job.status
        );
        Ok(job.id)
    }

    /// Add several jobs to one queue. Every job is validated before any is
    /// stored; ids are returned in input order.
    pub async fn add_bulk(&self, queue_name: &str, jobs: Vec<NewJob>) -> Result<Vec<JobId>> {
        self.ensure_queue(queue_name).await?;
        for new_job in &jobs {
            validate_new_job(&new_job.name, &new_job.options)?;
        }

        let now = self.inner.clock.now();
        let mut ids = Vec::with_capacity(jobs.len());
        for new_job in jobs {
            let job = Job::new(queue_name, new_job.name, new_job.payload, new_job.options, now);
            self.inner.enqueue(&job).await?;
            ids.push(job.id);
        }

        debug!("Added {} jobs to queue '{}'", ids.len(), queue_name);
        Ok(ids)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| not_found(job_id))
    }

    /// Set the progress (0 to 100) of an active job.
    pub async fn update_progress(&self, job_id: JobId, progress: u8) -> Result<()> {
        if progress > 100 {
            return Err(TaskhiveError::validation(format!(
                "progress must be between 0 and 100, got {}",
                progress
            )));
        }
        self.inner.report(job_id, progress).await
    }

    /// Move a failed job back to waiting with its attempts reset.
    pub async fn retry_job(&self, job_id: JobId) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.job_lock(job_id).lock().await;

        let mut job = inner
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| not_found(job_id))?;
        if job.status != JobStatus::Failed {
            return Err(TaskhiveError::validation(format!(
                "only failed jobs can be retried; job {} is {}",
                job_id, job.status
            )));
        }
        if !inner
            .store
            .sorted_remove(&inner.keys.failed(&job.queue_name), job_id)
            .await?
        {
            return Err(TaskhiveError::validation(format!(
                "job {} is no longer in the failed index",
                job_id
            )));
        }

        job.status = JobStatus::Waiting;
        job.attempts = 0;
        job.progress = 0;
        job.error = None;
        job.failed_at = None;
        job.scheduled_for = None;
        inner.store.put_job(&job, inner.config.jobs.ttl).await?;

        let score = inner
            .next_waiting_score(&job.queue_name, job.options.priority)
            .await?;
        inner
            .store
            .sorted_add(&inner.keys.waiting(&job.queue_name), job_id, score)
            .await?;

        info!("Retrying failed job {} on queue '{}'", job_id, job.queue_name);
        Ok(())
    }

    /// Delete a job that is not active.
    pub async fn remove_job(&self, job_id: JobId) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.job_lock(job_id).lock().await;

        let job = inner
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| not_found(job_id))?;

        let index = match job.status {
            JobStatus::Active => {
                return Err(TaskhiveError::validation(format!(
                    "job {} is active and cannot be removed",
                    job_id
                )));
            }
            JobStatus::Waiting => Some(inner.keys.waiting(&job.queue_name)),
            JobStatus::Delayed => Some(inner.keys.delayed(&job.queue_name)),
            JobStatus::Failed => Some(inner.keys.failed(&job.queue_name)),
            JobStatus::Completed => None,
        };

        if let Some(index) = index {
            let claimed = inner.store.sorted_remove(&index, job_id).await?;
            // A waiting or delayed job missing from its index was just claimed
            // by the dispatcher.
            if !claimed && matches!(job.status, JobStatus::Waiting | JobStatus::Delayed) {
                return Err(TaskhiveError::validation(format!(
                    "job {} is being dispatched and cannot be removed",
                    job_id
                )));
            }
        }

        inner.store.delete_job(job_id).await?;
        debug!("Removed job {} from queue '{}'", job_id, job.queue_name);
        Ok(())
    }

    // Stats and admin

    pub async fn get_queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        self.inner.queue_stats(queue_name).await
    }

    /// Stats for every queue, sorted by queue name.
    pub async fn get_all_stats(&self) -> Result<Vec<QueueStats>> {
        let mut all = Vec::new();
        for config in self.inner.registry.configs().await {
            all.push(self.inner.queue_stats(&config.name).await?);
        }
        Ok(all)
    }

    /// Failed jobs of a queue, most recently failed first.
    pub async fn get_failed_jobs(&self, queue_name: &str, limit: usize) -> Result<Vec<Job>> {
        self.ensure_queue(queue_name).await?;
        let ids = self
            .inner
            .store
            .sorted_range(&self.inner.keys.failed(queue_name), 0, limit, Order::Descending)
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for job_id in ids {
            if let Some(job) = self.inner.store.get_job(job_id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Delete every failed job of a queue. Returns the number removed.
    pub async fn clear_failed(&self, queue_name: &str) -> Result<u64> {
        self.ensure_queue(queue_name).await?;
        let removed = self
            .inner
            .sweep_index(&self.inner.keys.failed(queue_name))
            .await?;
        info!("Cleared {} failed jobs from queue '{}'", removed, queue_name);
        Ok(removed)
    }

    /// Delete every waiting and delayed job of a queue. Active jobs are left
    /// alone. Returns the number removed.
    pub async fn drain(&self, queue_name: &str) -> Result<u64> {
        self.ensure_queue(queue_name).await?;
        let waiting = self
            .inner
            .sweep_index(&self.inner.keys.waiting(queue_name))
            .await?;
        let delayed = self
            .inner
            .sweep_index(&self.inner.keys.delayed(queue_name))
            .await?;
        info!(
            "Drained queue '{}' ({} waiting, {} delayed)",
            queue_name, waiting, delayed
        );
        Ok(waiting + delayed)
    }

    // Dispatcher lifecycle

    /// Run one dispatcher pass: promote due delayed jobs and fill free slots.
    pub async fn tick(&self) -> TickReport {
        dispatcher::tick(&self.inner).await
    }

    /// Wait until every execution started so far has finished. Returns
    /// `false` if `timeout` elapsed first.
    ///
    /// The dispatcher keeps running while this waits, so executions it starts
    /// in the meantime are waited for as well.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut running = self.inner.running.subscribe();
        let idle = tokio::time::timeout(timeout, running.wait_for(|count| *count == 0))
            .await
            .is_ok_and(|changed| changed.is_ok());
        if idle {
            dispatcher::reap_finished(&self.inner).await;
        }
        idle
    }

    /// Spawn the dispatcher loop.
    pub async fn start(&self) -> Result<()> {
        let mut dispatcher = self.inner.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Err(TaskhiveError::Dispatcher {
                message: "dispatcher is already running".to_string(),
            });
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(dispatcher::run(self.inner.clone(), shutdown_rx));
        *dispatcher = Some(DispatcherHandle { shutdown_tx, task });
        Ok(())
    }

    /// Stop the dispatcher loop. With `wait_for_active`, also wait (up to the
    /// configured shutdown timeout) for running jobs to finish.
    pub async fn stop(&self, wait_for_active: bool) -> Result<()> {
        let handle = self.inner.dispatcher.lock().await.take();
        let Some(DispatcherHandle { shutdown_tx, task }) = handle else {
            return Err(TaskhiveError::Dispatcher {
                message: "dispatcher is not running".to_string(),
            });
        };

        if shutdown_tx.send(()).await.is_err() {
            warn!("Dispatcher loop had already exited");
        }
        task.await.map_err(|e| TaskhiveError::Dispatcher {
            message: format!("dispatcher task failed: {}", e),
        })?;

        if wait_for_active {
            let timeout = self.inner.config.dispatcher.shutdown_timeout;
            if !self.wait_idle(timeout).await {
                warn!(
                    "Shutdown timeout of {:?} elapsed with jobs still running",
                    timeout
                );
            }
        }
        info!("Queue manager stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.dispatcher.lock().await.is_some()
    }

    async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        if self.inner.registry.exists(queue_name).await {
            Ok(())
        } else {
            Err(TaskhiveError::QueueNotFound {
                name: queue_name.to_string(),
            })
        }
    }
}

fn validate_new_job(job_name: &str, options: &JobOptions) -> Result<()> {
    if job_name.is_empty() {
        return Err(TaskhiveError::validation("job name must not be empty"));
    }
    options.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use serde_json::json;

    fn manager() -> QueueManager {
        QueueManager::in_memory(TaskhiveConfig::default())
    }

    #[tokio::test]
    async fn test_add_job_to_unknown_queue() {
        let manager = manager();
        let result = manager
            .add_job("nope", "welcome", json!({}), JobOptions::new())
            .await;
        assert!(matches!(result, Err(TaskhiveError::QueueNotFound { .. })));
    }

    #[tokio::test]
    async fn test_add_job_indexes_by_status() {
        let manager = manager();
        manager.create_queue("email", 1).await.unwrap();

        let now_id = manager
            .add_job("email", "welcome", json!({}), JobOptions::new())
            .await
            .unwrap();
        let later_id = manager
            .add_job(
                "email",
                "digest",
                json!({}),
                JobOptions::new().with_delay(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        assert_eq!(manager.get_job(now_id).await.unwrap().status, JobStatus::Waiting);
        assert_eq!(manager.get_job(later_id).await.unwrap().status, JobStatus::Delayed);

        let stats = manager.get_queue_stats("email").await.unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.delayed, 1);
    }

    #[tokio::test]
    async fn test_add_job_rejects_invalid_options() {
        let manager = manager();
        manager.create_queue("email", 1).await.unwrap();

        for options in [
            JobOptions::new().with_priority(0),
            JobOptions::new().with_priority(11),
            JobOptions::new().with_max_attempts(0),
            JobOptions::new().with_delay(Duration::MAX),
        ] {
            let result = manager.add_job("email", "welcome", json!({}), options).await;
            assert!(matches!(result, Err(TaskhiveError::Validation { .. })));
        }
        assert!(manager.add_job("email", "", json!({}), JobOptions::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let manager = manager();
        let result = manager.get_job(uuid::Uuid::new_v4()).await;
        assert!(matches!(result, Err(TaskhiveError::JobNotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_progress_requires_active_job() {
        let manager = manager();
        manager.create_queue("email", 1).await.unwrap();
        let id = manager
            .add_job("email", "welcome", json!({}), JobOptions::new())
            .await
            .unwrap();

        assert!(matches!(
            manager.update_progress(id, 101).await,
            Err(TaskhiveError::Validation { .. })
        ));
        assert!(matches!(
            manager.update_progress(id, 50).await,
            Err(TaskhiveError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_job_requires_failed_status() {
        let manager = manager();
        manager.create_queue("email", 1).await.unwrap();
        let id = manager
            .add_job("email", "welcome", json!({}), JobOptions::new())
            .await
            .unwrap();

        assert!(matches!(
            manager.retry_job(id).await,
            Err(TaskhiveError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_waiting_and_delayed_jobs() {
        let manager = manager();
        manager.create_queue("email", 1).await.unwrap();
        let waiting = manager
            .add_job("email", "welcome", json!({}), JobOptions::new())
            .await
            .unwrap();
        let delayed = manager
            .add_job(
                "email",
                "welcome",
                json!({}),
                JobOptions::new().with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        manager.remove_job(waiting).await.unwrap();
        manager.remove_job(delayed).await.unwrap();

        let stats = manager.get_queue_stats("email").await.unwrap();
        assert_eq!(stats.waiting + stats.delayed, 0);
        assert!(manager.get_job(waiting).await.is_err());
        assert!(matches!(
            manager.remove_job(waiting).await,
            Err(TaskhiveError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sequence_breaks_priority_ties() {
        let manager = manager();
        manager.create_queue("email", 1).await.unwrap();

        let first = manager
            .add_job("email", "a", json!({}), JobOptions::new())
            .await
            .unwrap();
        let urgent = manager
            .add_job("email", "b", json!({}), JobOptions::new().with_priority(1))
            .await
            .unwrap();
        let second = manager
            .add_job("email", "c", json!({}), JobOptions::new())
            .await
            .unwrap();

        let order = manager
            .inner
            .store
            .sorted_range(&manager.inner.keys.waiting("email"), 0, 10, Order::Ascending)
            .await
            .unwrap();
        assert_eq!(order, vec![urgent, first, second]);
    }

    #[tokio::test]
    async fn test_delayed_job_uses_manager_clock() {
        let clock = MockClock::new();
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let manager = QueueManager::builder(store).clock(clock.clone()).build();
        manager.create_queue("email", 1).await.unwrap();

        let id = manager
            .add_job(
                "email",
                "digest",
                json!({}),
                JobOptions::new().with_delay(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        let job = manager.get_job(id).await.unwrap();
        assert_eq!(
            job.scheduled_for,
            Some(clock.now() + chrono::Duration::seconds(30))
        );
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_when_idle() {
        let manager = manager();
        assert!(manager.stop(false).await.is_err());

        manager.start().await.unwrap();
        assert!(manager.is_running().await);
        assert!(matches!(
            manager.start().await,
            Err(TaskhiveError::Dispatcher { .. })
        ));

        manager.stop(true).await.unwrap();
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn test_from_config_defaults_to_memory() {
        let manager = QueueManager::from_config(TaskhiveConfig::default())
            .await
            .unwrap();
        manager.create_queue("email", 1).await.unwrap();
        assert_eq!(manager.get_all_stats().await.unwrap().len(), 1);
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_from_config_rejects_redis_url_without_feature() {
        let config = TaskhiveConfig::default().with_redis_url("redis://localhost");
        let result = tokio_test::block_on(QueueManager::from_config(config));
        assert!(matches!(result, Err(TaskhiveError::Config(_))));
    }
}
