//! Named queues, their concurrency limits, pause flags and processor bindings.
//!
//! Processors are registered against a `(queue, job name)` pair with a typed
//! payload. The registry erases the payload type into a [`Processor`] over the
//! stored JSON so the dispatcher can look them up by name.

use crate::{
    Result, TaskhiveError,
    job::{Job, JobId},
};
use futures_util::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Type-erased processor stored in the registry.
pub type Processor =
    Arc<dyn Fn(Job, ProgressReporter) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Sink for progress updates reported by a running processor.
#[async_trait::async_trait]
pub(crate) trait ProgressSink: Send + Sync {
    async fn report(&self, job_id: JobId, progress: u8) -> Result<()>;
}

/// Handed to every processor invocation to report progress (0 to 100).
///
/// Reporting is best effort: failures are logged and swallowed so that a
/// store hiccup never fails the job itself.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub(crate) fn new(job_id: JobId, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            job_id,
            sink: Some(sink),
        }
    }

    /// A reporter that drops every update, for calling processors directly.
    pub fn noop(job_id: JobId) -> Self {
        Self { job_id, sink: None }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub async fn report(&self, progress: u8) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.report(self.job_id, progress.min(100)).await {
                debug!("Dropping progress update for job {}: {}", self.job_id, e);
            }
        }
    }
}

/// Snapshot of a queue's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    pub concurrency: usize,
    pub is_paused: bool,
}

struct QueueEntry {
    config: QueueConfig,
    processors: HashMap<String, Processor>,
    missing_processors: BTreeSet<String>,
}

impl QueueEntry {
    fn new(name: &str, concurrency: usize) -> Self {
        Self {
            config: QueueConfig {
                name: name.to_string(),
                concurrency,
                is_paused: false,
            },
            processors: HashMap::new(),
            missing_processors: BTreeSet::new(),
        }
    }
}

/// Registry of queues known to one manager.
pub struct QueueRegistry {
    queues: RwLock<HashMap<String, QueueEntry>>,
    default_concurrency: usize,
}

impl QueueRegistry {
    pub fn new(default_concurrency: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            default_concurrency: default_concurrency.max(1),
        }
    }

    /// Create a queue. Calling it again for an existing name changes nothing.
    pub async fn create_queue(&self, name: &str, concurrency: usize) -> Result<()> {
        validate_queue(name, concurrency)?;

        let mut queues = self.queues.write().await;
        if !queues.contains_key(name) {
            info!("Created queue '{}' with concurrency {}", name, concurrency);
            queues.insert(name.to_string(), QueueEntry::new(name, concurrency));
        }
        Ok(())
    }

    /// Bind a typed processor to `(queue, job_name)`, creating the queue with
    /// the default concurrency when it does not exist yet.
    pub async fn register_processor<T, R, F, Fut>(
        &self,
        queue_name: &str,
        job_name: &str,
        processor: F,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Job<T>, ProgressReporter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let processor = Arc::new(processor);
        let erased: Processor = Arc::new(
            move |job: Job, progress: ProgressReporter| -> BoxFuture<'static, Result<serde_json::Value>> {
                let processor = processor.clone();
                Box::pin(async move {
                    let typed = job.decode::<T>().map_err(|e| {
                        TaskhiveError::processor(format!(
                            "invalid payload for '{}': {}",
                            job.name, e
                        ))
                    })?;
                    let output = processor(typed, progress).await?;
                    Ok(serde_json::to_value(output)?)
                })
            },
        );

        self.register_erased(queue_name, job_name, erased).await
    }

    /// Bind an already type-erased processor.
    pub async fn register_erased(
        &self,
        queue_name: &str,
        job_name: &str,
        processor: Processor,
    ) -> Result<()> {
        validate_queue(queue_name, self.default_concurrency)?;
        if job_name.is_empty() {
            return Err(TaskhiveError::validation("job name must not be empty"));
        }

        let mut queues = self.queues.write().await;
        let entry = queues.entry(queue_name.to_string()).or_insert_with(|| {
            info!(
                "Created queue '{}' with default concurrency {}",
                queue_name, self.default_concurrency
            );
            QueueEntry::new(queue_name, self.default_concurrency)
        });

        entry.processors.insert(job_name.to_string(), processor);
        entry.missing_processors.remove(job_name);
        info!(
            "Registered processor for job '{}' on queue '{}'",
            job_name, queue_name
        );
        Ok(())
    }

    pub async fn set_paused(&self, queue_name: &str, paused: bool) -> Result<()> {
        let mut queues = self.queues.write().await;
        let entry = queues
            .get_mut(queue_name)
            .ok_or_else(|| TaskhiveError::QueueNotFound {
                name: queue_name.to_string(),
            })?;
        entry.config.is_paused = paused;
        Ok(())
    }

    pub async fn exists(&self, queue_name: &str) -> bool {
        self.queues.read().await.contains_key(queue_name)
    }

    pub async fn config(&self, queue_name: &str) -> Option<QueueConfig> {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|entry| entry.config.clone())
    }

    /// Configurations of every queue, sorted by name.
    pub async fn configs(&self) -> Vec<QueueConfig> {
        let queues = self.queues.read().await;
        let mut configs: Vec<QueueConfig> =
            queues.values().map(|entry| entry.config.clone()).collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    /// Look up the processor for `(queue_name, job_name)`.
    pub async fn processor(&self, queue_name: &str, job_name: &str) -> Result<Processor> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .and_then(|entry| entry.processors.get(job_name).cloned())
            .ok_or_else(|| TaskhiveError::ProcessorMissing {
                queue_name: queue_name.to_string(),
                job_name: job_name.to_string(),
            })
    }

    /// Record that a job named `job_name` is waiting without a processor.
    /// Returns `true` the first time a name is recorded.
    pub(crate) async fn note_missing_processor(&self, queue_name: &str, job_name: &str) -> bool {
        let mut queues = self.queues.write().await;
        queues
            .get_mut(queue_name)
            .is_some_and(|entry| entry.missing_processors.insert(job_name.to_string()))
    }

    pub async fn missing_processors(&self, queue_name: &str) -> Vec<String> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|entry| entry.missing_processors.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn validate_queue(name: &str, concurrency: usize) -> Result<()> {
    if name.is_empty() {
        return Err(TaskhiveError::validation("queue name must not be empty"));
    }
    if name.contains(':') {
        return Err(TaskhiveError::validation(format!(
            "queue name '{}' must not contain ':'",
            name
        )));
    }
    if concurrency == 0 {
        return Err(TaskhiveError::validation(
            "queue concurrency must be at least 1",
        ));
    }
    Ok(())
}
