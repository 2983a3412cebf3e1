use crate::{Result, TaskhiveError, priority::JobPriority, retry::BackoffStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fmt, time::Duration};
use uuid::Uuid;

pub type JobId = Uuid;

/// Lifecycle state of a job.
///
/// ```text
/// waiting ──dispatch──▶ active ──success──▶ completed
///    ▲                    │
///    │ promotion          ├──retry──▶ delayed ──promotion──▶ waiting
///    │                    │
///    └──admin retry──── failed ◀──attempts exhausted──┘
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest delay accepted for `JobOptions::delay` and backoff settings.
pub const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Per-job options supplied when the job is added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobOptions {
    /// 1 (highest) to 10 (lowest). Validated when the job is added.
    pub priority: u8,
    #[serde(with = "duration_millis")]
    pub delay: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Per-job processor timeout. Falls back to the manager default when unset.
    #[serde(
        default,
        with = "option_duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::DEFAULT.value(),
            delay: Duration::ZERO,
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            timeout: None,
            remove_on_complete: false,
            remove_on_fail: false,
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn remove_on_complete(mut self, remove: bool) -> Self {
        self.remove_on_complete = remove;
        self
    }

    pub fn remove_on_fail(mut self, remove: bool) -> Self {
        self.remove_on_fail = remove;
        self
    }

    /// Check the options and return the validated priority.
    pub fn validate(&self) -> Result<JobPriority> {
        let priority = JobPriority::new(self.priority)?;
        if self.max_attempts == 0 {
            return Err(TaskhiveError::validation("max_attempts must be at least 1"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(TaskhiveError::validation("timeout must be greater than zero"));
        }
        if self.delay > MAX_DELAY {
            return Err(TaskhiveError::validation(format!(
                "delay must not exceed {:?}",
                MAX_DELAY
            )));
        }
        self.backoff.validate()?;
        Ok(priority)
    }
}

/// One unit of asynchronous work.
///
/// Jobs are stored with a JSON payload (`Job<serde_json::Value>`, the default
/// type parameter). Processors receive a `Job<T>` with the payload decoded into
/// the type they registered for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<T = serde_json::Value> {
    pub id: JobId,
    pub queue_name: String,
    /// Processor key within the queue.
    pub name: String,
    pub payload: T,
    pub options: JobOptions,
    pub status: JobStatus,
    pub attempts: u32,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
}

impl Job {
    /// Build a new job record. Status and `scheduled_for` follow from the delay.
    pub fn new(
        queue_name: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let (status, scheduled_for) = if options.delay.is_zero() {
            (JobStatus::Waiting, None)
        } else {
            let at = checked_after(now, options.delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
            (JobStatus::Delayed, Some(at))
        };

        Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            name: name.into(),
            payload,
            options,
            status,
            attempts: 0,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            scheduled_for,
            processing_time_ms: None,
        }
    }

    /// Decode the payload into the type a processor registered for.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Job<T>> {
        let payload = serde_json::from_value(self.payload.clone())?;
        Ok(self.with_payload(payload))
    }
}

impl<T> Job<T> {
    /// Copy of the job metadata carrying a different payload.
    pub fn with_payload<U>(&self, payload: U) -> Job<U> {
        Job {
            id: self.id,
            queue_name: self.queue_name.clone(),
            name: self.name.clone(),
            payload,
            options: self.options.clone(),
            status: self.status,
            attempts: self.attempts,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            scheduled_for: self.scheduled_for,
            processing_time_ms: self.processing_time_ms,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.options.max_attempts
    }
}

/// `at + duration`, or `None` when the result is not a representable time.
pub(crate) fn checked_after(at: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
}

/// `at - duration`, clamped to the earliest representable time.
pub(crate) fn saturating_before(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Serialize `Duration` as integer milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Serialize `Option<Duration>` as optional integer milliseconds.
pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => super::duration_millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
