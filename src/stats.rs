use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

/// Point-in-time counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Name of the queue
    pub queue_name: String,
    /// Jobs in the waiting index
    pub waiting: u64,
    /// Jobs currently holding a concurrency slot
    pub active: u64,
    /// Jobs waiting for their scheduled time (initial delay or retry backoff)
    pub delayed: u64,
    /// Jobs in the failed (dead-letter) index
    pub failed: u64,
    /// Jobs completed since the counter was created
    pub completed: u64,
    pub concurrency: usize,
    pub paused: bool,
    /// Job names found waiting with no registered processor. Such jobs stay in
    /// the waiting index until a processor is registered.
    pub missing_processors: Vec<String>,
}

/// Statistics for job processing over a time window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatistics {
    /// Executions that reached an outcome in the window
    pub total_processed: u64,
    pub completed: u64,
    /// Executions that exhausted their attempts
    pub failed: u64,
    /// Failed executions that were scheduled for another attempt
    pub retried: u64,
    /// Executions cut off by their timeout (counted in retried/failed too)
    pub timed_out: u64,
    pub started: u64,
    pub avg_processing_time_ms: f64,
    pub min_processing_time_ms: u64,
    pub max_processing_time_ms: u64,
    pub throughput_per_minute: f64,
    /// (failed + retried) / total_processed
    pub error_rate: f64,
    pub time_window: Duration,
    pub calculated_at: DateTime<Utc>,
}

impl Default for JobStatistics {
    fn default() -> Self {
        Self {
            total_processed: 0,
            completed: 0,
            failed: 0,
            retried: 0,
            timed_out: 0,
            started: 0,
            avg_processing_time_ms: 0.0,
            min_processing_time_ms: 0,
            max_processing_time_ms: 0,
            throughput_per_minute: 0.0,
            error_rate: 0.0,
            time_window: Duration::from_secs(60),
            calculated_at: Utc::now(),
        }
    }
}

/// Job processing event emitted by the executor.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: JobId,
    pub queue_name: String,
    pub job_name: String,
    pub event_type: JobEventType,
    pub processing_time_ms: Option<u64>,
    pub error_message: Option<String>,
    /// Set when the failure was a timeout.
    pub timed_out: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventType {
    Started,
    Completed,
    Retried,
    Failed,
}

impl JobEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventType::Started => "started",
            JobEventType::Completed => "completed",
            JobEventType::Retried => "retried",
            JobEventType::Failed => "failed",
        }
    }
}

/// Trait for collecting and storing job statistics
#[async_trait::async_trait]
pub trait StatisticsCollector: Send + Sync {
    /// Record a job processing event
    async fn record_event(&self, event: JobEvent) -> crate::Result<()>;

    /// Get statistics for a specific queue over a time window
    async fn get_queue_statistics(
        &self,
        queue_name: &str,
        window: Duration,
    ) -> crate::Result<JobStatistics>;

    /// Get overall system statistics
    async fn get_system_statistics(&self, window: Duration) -> crate::Result<JobStatistics>;

    /// Clear statistics older than the specified duration
    async fn cleanup_old_statistics(&self, older_than: Duration) -> crate::Result<u64>;
}

/// Configuration for statistics collection
#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Maximum number of events to keep in memory
    pub max_events: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
        }
    }
}

/// In-memory statistics collector with time-windowed data
pub struct InMemoryStatsCollector {
    events: Arc<RwLock<Vec<JobEvent>>>,
    config: StatsConfig,
}

impl InMemoryStatsCollector {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    pub fn new_default() -> Self {
        Self::new(StatsConfig::default())
    }

    fn filter_events_by_window(&self, window: Duration) -> Vec<JobEvent> {
        let cutoff = crate::job::saturating_before(Utc::now(), window);
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    fn calculate_statistics(&self, events: &[JobEvent], window: Duration) -> JobStatistics {
        let count = |event_type: JobEventType| {
            events
                .iter()
                .filter(|e| e.event_type == event_type)
                .count() as u64
        };

        let started = count(JobEventType::Started);
        let completed = count(JobEventType::Completed);
        let retried = count(JobEventType::Retried);
        let failed = count(JobEventType::Failed);
        let timed_out = events.iter().filter(|e| e.timed_out).count() as u64;
        let total_processed = completed + retried + failed;

        let processing_times: Vec<u64> =
            events.iter().filter_map(|e| e.processing_time_ms).collect();

        let (avg_processing_time_ms, min_processing_time_ms, max_processing_time_ms) =
            match (processing_times.iter().min(), processing_times.iter().max()) {
                (Some(min), Some(max)) => {
                    let sum: u64 = processing_times.iter().sum();
                    (sum as f64 / processing_times.len() as f64, *min, *max)
                }
                _ => (0.0, 0, 0),
            };

        let error_rate = if total_processed > 0 {
            (failed + retried) as f64 / total_processed as f64
        } else {
            0.0
        };

        let throughput_per_minute = if window.as_secs() > 0 {
            total_processed as f64 * 60.0 / window.as_secs() as f64
        } else {
            0.0
        };

        JobStatistics {
            total_processed,
            completed,
            failed,
            retried,
            timed_out,
            started,
            avg_processing_time_ms,
            min_processing_time_ms,
            max_processing_time_ms,
            throughput_per_minute,
            error_rate,
            time_window: window,
            calculated_at: Utc::now(),
        }
    }

    /// Number of events currently held.
    pub fn event_count(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait::async_trait]
impl StatisticsCollector for InMemoryStatsCollector {
    async fn record_event(&self, event: JobEvent) -> crate::Result<()> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events.push(event);

        if events.len() > self.config.max_events {
            let excess = events.len() - self.config.max_events;
            events.drain(0..excess);
        }

        Ok(())
    }

    async fn get_queue_statistics(
        &self,
        queue_name: &str,
        window: Duration,
    ) -> crate::Result<JobStatistics> {
        let queue_events: Vec<JobEvent> = self
            .filter_events_by_window(window)
            .into_iter()
            .filter(|e| e.queue_name == queue_name)
            .collect();

        Ok(self.calculate_statistics(&queue_events, window))
    }

    async fn get_system_statistics(&self, window: Duration) -> crate::Result<JobStatistics> {
        let events = self.filter_events_by_window(window);
        Ok(self.calculate_statistics(&events, window))
    }

    async fn cleanup_old_statistics(&self, older_than: Duration) -> crate::Result<u64> {
        let cutoff = crate::job::saturating_before(Utc::now(), older_than);
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let original_len = events.len();
        events.retain(|event| event.timestamp >= cutoff);
        Ok((original_len - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_job_event(
        queue_name: &str,
        event_type: JobEventType,
        processing_time_ms: Option<u64>,
        timed_out: bool,
    ) -> JobEvent {
        JobEvent {
            job_id: uuid::Uuid::new_v4(),
            queue_name: queue_name.to_string(),
            job_name: "test".to_string(),
            event_type,
            processing_time_ms,
            error_message: None,
            timed_out,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_empty_statistics() {
        let collector = InMemoryStatsCollector::new_default();
        let stats = collector
            .get_system_statistics(Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(stats.total_processed, 0);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_queue_statistics() {
        let collector = InMemoryStatsCollector::new_default();

        for event in [
            create_test_job_event("email", JobEventType::Started, None, false),
            create_test_job_event("email", JobEventType::Completed, Some(100), false),
            create_test_job_event("email", JobEventType::Completed, Some(300), false),
            create_test_job_event("email", JobEventType::Retried, None, true),
            create_test_job_event("reports", JobEventType::Failed, None, false),
        ] {
            collector.record_event(event).await.unwrap();
        }

        let stats = collector
            .get_queue_statistics("email", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.started, 1);
        assert_eq!(stats.avg_processing_time_ms, 200.0);
        assert_eq!(stats.min_processing_time_ms, 100);
        assert_eq!(stats.max_processing_time_ms, 300);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.throughput_per_minute, 3.0);

        let system = collector
            .get_system_statistics(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(system.total_processed, 4);
        assert_eq!(system.failed, 1);
    }

    #[tokio::test]
    async fn test_max_events_bound() {
        let collector = InMemoryStatsCollector::new(StatsConfig { max_events: 3 });
        for _ in 0..5 {
            collector
                .record_event(create_test_job_event("q", JobEventType::Completed, None, false))
                .await
                .unwrap();
        }
        assert_eq!(collector.event_count(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_old_statistics() {
        let collector = InMemoryStatsCollector::new_default();
        let mut old = create_test_job_event("q", JobEventType::Completed, None, false);
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        collector.record_event(old).await.unwrap();
        collector
            .record_event(create_test_job_event("q", JobEventType::Completed, None, false))
            .await
            .unwrap();

        let removed = collector
            .cleanup_old_statistics(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(collector.event_count(), 1);
    }
}
