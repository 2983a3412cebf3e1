//! Runs one claimed job through its processor and records the outcome.
//!
//! The processor is raced against the job's timeout (or the configured
//! default) and wrapped in `catch_unwind`, so errors, timeouts and panics all
//! take the same path: a retry through the delayed index while attempts
//! remain, the failed index (or deletion) once they are exhausted.
//!
//! Each outcome is settled under the job's lock: record, index, then the
//! active slot. If a store error aborts an execution, the spawn wrapper in the
//! dispatcher restores the job to the index its record calls for.
//!
//! A timed-out processor future is dropped, which cancels it at its next
//! `.await`. Blocking code inside a processor is not interrupted.

use crate::{
    Result, TaskhiveError,
    job::{Job, JobId, JobStatus, checked_after},
    manager::{Inner, RecordUpdate},
    registry::{Processor, ProgressReporter, ProgressSink},
    stats::{JobEvent, JobEventType},
};
use futures_util::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

/// Why an attempt failed.
struct Failure {
    message: String,
    timed_out: bool,
}

/// Execute `job_id`, which the dispatcher has already moved into the active
/// set. The active-set entry is released on every path that returns `Ok`.
pub(crate) async fn execute(inner: Arc<Inner>, job_id: JobId, processor: Processor) -> Result<()> {
    let started_at = inner.clock.now();
    let mut new_attempt = false;
    let job = inner
        .update_job(job_id, |job| {
            job.status = JobStatus::Active;
            job.started_at = Some(started_at);
            job.scheduled_for = None;
            if job.has_attempts_left() {
                job.attempts += 1;
                new_attempt = true;
            }
            Ok(())
        })
        .await?;

    if !new_attempt {
        let failure = Failure {
            message: format!("attempts exhausted ({} of {})", job.attempts, job.options.max_attempts),
            timed_out: false,
        };
        return fail_job(&inner, job, failure, None).await;
    }

    inner
        .record_event(event(&job, JobEventType::Started, None, None, false))
        .await;

    let timeout = job
        .options
        .timeout
        .unwrap_or(inner.config.jobs.default_timeout);
    let reporter = ProgressReporter::new(job_id, inner.clone() as Arc<dyn ProgressSink>);
    let input = job.clone();
    let run = AssertUnwindSafe(async move { processor(input, reporter).await }).catch_unwind();

    let clock_start = Instant::now();
    let outcome = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(Failure {
            message: e.to_string(),
            timed_out: false,
        }),
        Ok(Err(panic)) => Err(Failure {
            message: format!("processor panicked: {}", panic_message(&*panic)),
            timed_out: false,
        }),
        Err(_) => {
            warn!("Job {} timed out after {:?}", job_id, timeout);
            Err(Failure {
                message: TaskhiveError::Timeout { timeout }.to_string(),
                timed_out: true,
            })
        }
    };
    let elapsed_ms = clock_start.elapsed().as_millis() as u64;

    match outcome {
        Ok(value) => complete_job(&inner, job, value, elapsed_ms).await,
        Err(failure) => fail_job(&inner, job, failure, Some(elapsed_ms)).await,
    }
}

async fn complete_job(
    inner: &Inner,
    job: Job,
    value: serde_json::Value,
    elapsed_ms: u64,
) -> Result<()> {
    let now = inner.clock.now();
    let remove = job.options.remove_on_complete;
    let job = inner
        .settle_job(job.id, None, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.result = Some(value);
            job.error = None;
            job.completed_at = Some(now);
            job.processing_time_ms = Some(elapsed_ms);
            Ok(if remove {
                RecordUpdate::Delete
            } else {
                RecordUpdate::Save
            })
        })
        .await?;

    inner
        .store
        .increment(&inner.keys.completed_count(&job.queue_name), 1)
        .await?;

    debug!("Job {} completed successfully in {}ms", job.id, elapsed_ms);
    inner
        .record_event(event(&job, JobEventType::Completed, Some(elapsed_ms), None, false))
        .await;
    Ok(())
}

async fn fail_job(
    inner: &Inner,
    job: Job,
    failure: Failure,
    elapsed_ms: Option<u64>,
) -> Result<()> {
    let now = inner.clock.now();
    error!("Job {} failed: {}", job.id, failure.message);

    let retry_at = if job.has_attempts_left() {
        let delay = job.options.backoff.calculate_delay(job.attempts);
        let retry_at = checked_after(now, delay);
        if retry_at.is_none() {
            warn!(
                "Retry delay of {:?} for job {} is out of range, failing it",
                delay, job.id
            );
        }
        retry_at
    } else {
        None
    };

    if let Some(retry_at) = retry_at {
        let message = failure.message.clone();
        let index = (inner.keys.delayed(&job.queue_name), retry_at.timestamp_millis());
        let job = inner
            .settle_job(job.id, Some(index), |job| {
                job.status = JobStatus::Delayed;
                job.scheduled_for = Some(retry_at);
                job.error = Some(message);
                job.processing_time_ms = elapsed_ms;
                Ok(RecordUpdate::Save)
            })
            .await?;

        info!(
            "Retrying job {} at {} (attempt {} of {})",
            job.id, retry_at, job.attempts, job.options.max_attempts
        );
        inner
            .record_event(event(
                &job,
                JobEventType::Retried,
                elapsed_ms,
                Some(failure.message),
                failure.timed_out,
            ))
            .await;
        return Ok(());
    }

    let remove = job.options.remove_on_fail;
    let message = failure.message.clone();
    let index = (!remove).then(|| (inner.keys.failed(&job.queue_name), now.timestamp_millis()));
    let job = inner
        .settle_job(job.id, index, |job| {
            job.status = JobStatus::Failed;
            job.failed_at = Some(now);
            job.error = Some(message);
            job.processing_time_ms = elapsed_ms;
            Ok(if remove {
                RecordUpdate::Delete
            } else {
                RecordUpdate::Save
            })
        })
        .await?;

    warn!(
        "Job {} failed after {} of {} attempts, marking as failed",
        job.id, job.attempts, job.options.max_attempts
    );
    inner
        .record_event(event(
            &job,
            JobEventType::Failed,
            elapsed_ms,
            Some(failure.message),
            failure.timed_out,
        ))
        .await;
    Ok(())
}

fn event(
    job: &Job,
    event_type: JobEventType,
    processing_time_ms: Option<u64>,
    error_message: Option<String>,
    timed_out: bool,
) -> JobEvent {
    JobEvent {
        job_id: job.id,
        queue_name: job.queue_name.clone(),
        job_name: job.name.clone(),
        event_type,
        processing_time_ms,
        error_message,
        timed_out,
        timestamp: chrono::Utc::now(),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*static_str), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*owned), "bang");

        let other: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(&*other), "unknown panic payload");
    }
}
