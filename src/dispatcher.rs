//! The coordinating loop that moves jobs out of the delayed and waiting
//! indices and onto executors.
//!
//! Each tick walks every non-paused queue, promotes delayed jobs whose time
//! has come, then claims up to `concurrency - active` jobs from the front of
//! the waiting index. Claimed jobs run as tasks in the manager's `JoinSet`;
//! the tick never waits on them. Ticks are serialized, so a manual
//! [`QueueManager::tick`](crate::QueueManager::tick) racing the background
//! loop cannot overfill a queue.

use crate::{
    Result, TaskhiveError,
    executor::{self, panic_message},
    job::{JobId, JobStatus},
    manager::Inner,
    registry::{Processor, QueueConfig},
    store::Order,
};
use futures_util::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Upper bound on delayed jobs promoted per queue per tick.
const PROMOTION_BATCH: usize = 1000;

/// Upper bound on waiting jobs skipped (no processor) per queue per tick.
const MAX_SKIPPED: usize = 1000;

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Delayed jobs moved to waiting
    pub promoted: usize,
    /// Jobs handed to an executor
    pub dispatched: usize,
}

pub(crate) async fn run(inner: Arc<Inner>, mut shutdown_rx: mpsc::Receiver<()>) {
    let poll_interval = inner.config.dispatcher.poll_interval;
    info!("Dispatcher started (poll interval {:?})", poll_interval);

    loop {
        let report = tick(&inner).await;
        if report.promoted > 0 || report.dispatched > 0 {
            debug!(
                "Dispatcher tick promoted {} and dispatched {} jobs",
                report.promoted, report.dispatched
            );
        }

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Dispatcher shutting down");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

pub(crate) async fn tick(inner: &Arc<Inner>) -> TickReport {
    let _tick = inner.tick_lock.lock().await;
    reap_finished(inner).await;

    let mut report = TickReport::default();
    for queue in inner.registry.configs().await {
        if queue.is_paused {
            continue;
        }

        match promote_delayed(inner, &queue.name).await {
            Ok(promoted) => report.promoted += promoted,
            Err(e) => error!(
                "Error promoting delayed jobs on queue '{}': {}",
                queue.name, e
            ),
        }

        match fill_slots(inner, &queue).await {
            Ok(dispatched) => report.dispatched += dispatched,
            Err(e) => error!("Error dispatching jobs on queue '{}': {}", queue.name, e),
        }

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &inner.metrics {
            match inner.queue_stats(&queue.name).await {
                Ok(stats) => metrics.update_queue_depth(&stats),
                Err(e) => debug!("Skipping depth metrics for '{}': {}", queue.name, e),
            }
        }
    }
    report
}

pub(crate) async fn reap_finished(inner: &Inner) {
    let mut in_flight = inner.in_flight.lock().await;
    while let Some(result) = in_flight.try_join_next() {
        if let Err(e) = result {
            error!("Job execution task failed: {}", e);
        }
    }
}

async fn promote_delayed(inner: &Inner, queue_name: &str) -> Result<usize> {
    let delayed_key = inner.keys.delayed(queue_name);
    let now_ms = inner.clock.now_millis();

    let due = inner
        .store
        .sorted_range_by_score(&delayed_key, now_ms, PROMOTION_BATCH)
        .await?;

    let mut promoted = 0;
    for job_id in due {
        if !inner.store.sorted_remove(&delayed_key, job_id).await? {
            continue;
        }

        match promote_one(inner, queue_name, job_id).await {
            Ok(true) => promoted += 1,
            Ok(false) => {}
            Err(e) if e.is_malformed_record() => {
                error!("Dropped malformed delayed job {}: {}", job_id, e);
            }
            Err(TaskhiveError::JobNotFound { .. }) => {
                debug!("Dropped expired job {} from delayed index", job_id);
            }
            Err(e) => {
                // Put it back so the next tick can try again.
                inner.store.sorted_add(&delayed_key, job_id, now_ms).await?;
                return Err(e);
            }
        }
    }

    if promoted > 0 {
        debug!("Promoted {} delayed jobs on queue '{}'", promoted, queue_name);
    }
    Ok(promoted)
}

/// Move one claimed delayed job into the waiting index. Returns `false` when
/// the record has already finished and belongs in no index.
///
/// The score is allocated before the record changes, and the index insert
/// comes last, so any error leaves the job for the caller to put back.
async fn promote_one(inner: &Inner, queue_name: &str, job_id: JobId) -> Result<bool> {
    let job = inner
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| TaskhiveError::JobNotFound {
            id: job_id.to_string(),
        })?;
    if job.status.is_terminal() {
        debug!("Dropped {} job {} from delayed index", job.status, job_id);
        return Ok(false);
    }

    let score = inner
        .next_waiting_score(queue_name, job.options.priority)
        .await?;
    inner
        .update_job(job_id, |job| {
            job.status = JobStatus::Waiting;
            job.scheduled_for = None;
            Ok(())
        })
        .await?;
    inner
        .store
        .sorted_add(&inner.keys.waiting(queue_name), job_id, score)
        .await?;
    Ok(true)
}

async fn fill_slots(inner: &Arc<Inner>, queue: &QueueConfig) -> Result<usize> {
    let waiting_key = inner.keys.waiting(&queue.name);
    let active_key = inner.keys.active(&queue.name);

    let active = inner.store.sorted_len(&active_key).await? as usize;
    let mut free = queue.concurrency.saturating_sub(active);
    let mut skipped = 0;
    let mut dispatched = 0;

    while free > 0 && skipped < MAX_SKIPPED {
        let candidates = inner
            .store
            .sorted_range(&waiting_key, skipped, free, Order::Ascending)
            .await?;
        if candidates.is_empty() {
            break;
        }

        for job_id in candidates {
            let job = match inner.store.get_job(job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    inner.store.sorted_remove(&waiting_key, job_id).await?;
                    debug!("Dropped expired job {} from queue '{}'", job_id, queue.name);
                    continue;
                }
                Err(e) if e.is_malformed_record() => {
                    inner.store.sorted_remove(&waiting_key, job_id).await?;
                    error!(
                        "Dropped malformed job {} from queue '{}': {}",
                        job_id, queue.name, e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let processor = match inner.registry.processor(&queue.name, &job.name).await {
                Ok(processor) => processor,
                Err(e) => {
                    skipped += 1;
                    if inner
                        .registry
                        .note_missing_processor(&queue.name, &job.name)
                        .await
                    {
                        warn!("{}; leaving job {} waiting", e, job_id);
                    }
                    continue;
                }
            };

            if !inner.store.sorted_remove(&waiting_key, job_id).await? {
                continue;
            }
            inner
                .store
                .sorted_add(&active_key, job_id, inner.clock.now_millis())
                .await?;

            debug!("Dispatching job {} on queue '{}'", job_id, queue.name);
            spawn_execution(inner, job_id, &queue.name, processor).await;
            free -= 1;
            dispatched += 1;
        }
    }

    Ok(dispatched)
}

/// Counts one running execution until dropped.
struct RunningGuard(Arc<Inner>);

impl RunningGuard {
    fn acquire(inner: &Arc<Inner>) -> Self {
        inner.running.send_modify(|count| *count += 1);
        RunningGuard(inner.clone())
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0
            .running
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

async fn spawn_execution(inner: &Arc<Inner>, job_id: JobId, queue_name: &str, processor: Processor) {
    let task_inner = inner.clone();
    let queue_name = queue_name.to_string();
    let guard = RunningGuard::acquire(inner);

    inner.in_flight.lock().await.spawn(async move {
        let _guard = guard;
        let outcome = AssertUnwindSafe(executor::execute(task_inner.clone(), job_id, processor))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("executor panicked: {}", panic_message(&*panic)),
        };

        error!(
            "Execution of job {} on queue '{}' aborted: {}",
            job_id, queue_name, failure
        );
        if let Err(e) = task_inner.restore_index(job_id).await {
            error!("Failed to restore job {} to its index: {}", job_id, e);
        }
        let active_key = task_inner.keys.active(&queue_name);
        if let Err(e) = task_inner.store.sorted_remove(&active_key, job_id).await {
            error!("Failed to release slot held by job {}: {}", job_id, e);
        }
    });
}
