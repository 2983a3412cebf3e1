//! Integration tests for the admin surface: bulk adds, draining, removal and
//! statistics.


use serde_json::json;
use std::{sync::Arc, time::Duration};
use taskhive::{
    InMemoryStatsCollector, Job, JobOptions, JobStatus, MemoryStore, NewJob, QueueManager,
    StatisticsCollector, TaskhiveConfig, TaskhiveError,
};
use test_utils::{manager_with_clock, run_tick, stats};
use tokio::sync::Notify;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drain_leaves_active_jobs_alone() {
    let (manager, _clock) = manager_with_clock();
    manager.create_queue("email", 1).await.unwrap();

    let gate = Arc::new(Notify::new());
    let gate_in = gate.clone();
    manager
        .register_processor("email", "welcome", move |_job: Job, _| {
            let gate = gate_in.clone();
            async move {
                gate.notified().await;
                Ok(())
            }
        })
        .await
        .unwrap();

    let active = manager
        .add_job("email", "welcome", json!({}), JobOptions::new().with_priority(1))
        .await
        .unwrap();
    for _ in 0..2 {
        manager
            .add_job("email", "welcome", json!({}), JobOptions::new())
            .await
            .unwrap();
    }
    manager
        .add_job(
            "email",
            "welcome",
            json!({}),
            JobOptions::new().with_delay(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    assert_eq!(manager.tick().await.dispatched, 1);
    assert_eq!(manager.drain("email").await.unwrap(), 3);

    let drained = stats(&manager, "email").await;
    assert_eq!(
        (drained.waiting, drained.delayed, drained.active),
        (0, 0, 1)
    );

    gate.notify_one();
    assert!(manager.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(manager.get_job(active).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_add_bulk_validates_before_inserting() {
    let (manager, _clock) = manager_with_clock();
    manager.create_queue("email", 1).await.unwrap();

    let result = manager
        .add_bulk(
            "email",
            vec![
                NewJob::new("welcome", json!({"user": 1})),
                NewJob::new("welcome", json!({"user": 2}))
                    .with_options(JobOptions::new().with_priority(42)),
            ],
        )
        .await;
    assert!(matches!(result, Err(TaskhiveError::Validation { .. })));
    assert_eq!(stats(&manager, "email").await.waiting, 0);

    let ids = manager
        .add_bulk(
            "email",
            vec![
                NewJob::new("welcome", json!({"user": 1})),
                NewJob::new("digest", json!({}))
                    .with_options(JobOptions::new().with_delay(Duration::from_secs(5))),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(manager.get_job(ids[0]).await.unwrap().name, "welcome");
    assert_eq!(manager.get_job(ids[1]).await.unwrap().status, JobStatus::Delayed);

    let totals = stats(&manager, "email").await;
    assert_eq!((totals.waiting, totals.delayed), (1, 1));
}

#[tokio::test]
async fn test_admin_calls_on_unknown_queue() {
    let (manager, _clock) = manager_with_clock();

    assert!(matches!(
        manager.get_queue_stats("ghost").await,
        Err(TaskhiveError::QueueNotFound { .. })
    ));
    assert!(manager.drain("ghost").await.is_err());
    assert!(manager.clear_failed("ghost").await.is_err());
    assert!(manager.get_failed_jobs("ghost", 5).await.is_err());
    assert!(
        manager
            .add_bulk("ghost", vec![NewJob::new("welcome", json!({}))])
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_remove_failed_and_completed_jobs() {
    let (manager, _clock) = manager_with_clock();
    manager.create_queue("sync", 2).await.unwrap();
    manager
        .register_processor("sync", "ok", |_job: Job, _| async move { Ok(()) })
        .await
        .unwrap();
    manager
        .register_processor("sync", "bad", |_job: Job, _| async move {
            Err::<(), _>(TaskhiveError::processor("nope"))
        })
        .await
        .unwrap();

    let done = manager
        .add_job("sync", "ok", json!({}), JobOptions::new())
        .await
        .unwrap();
    let failed = manager
        .add_job("sync", "bad", json!({}), JobOptions::new().with_max_attempts(1))
        .await
        .unwrap();
    run_tick(&manager).await;

    manager.remove_job(done).await.unwrap();
    manager.remove_job(failed).await.unwrap();

    assert!(manager.get_job(done).await.is_err());
    assert!(manager.get_job(failed).await.is_err());
    assert_eq!(stats(&manager, "sync").await.failed, 0);
}

#[tokio::test]
async fn test_get_all_stats_sorted_by_queue() {
    let (manager, _clock) = manager_with_clock();
    manager.create_queue("reports", 3).await.unwrap();
    manager.create_queue("email", 1).await.unwrap();
    manager
        .add_job("email", "welcome", json!({}), JobOptions::new())
        .await
        .unwrap();

    let all = manager.get_all_stats().await.unwrap();
    let names: Vec<&str> = all.iter().map(|s| s.queue_name.as_str()).collect();
    assert_eq!(names, vec!["email", "reports"]);
    assert_eq!(all[0].waiting, 1);
    assert_eq!(all[1].concurrency, 3);
}

#[tokio::test]
async fn test_statistics_collector_receives_events() {
    let collector = Arc::new(InMemoryStatsCollector::new_default());
    let manager = QueueManager::builder(Arc::new(MemoryStore::new()))
        .config(TaskhiveConfig::default())
        .stats_collector(collector.clone())
        .build();

    manager.create_queue("sync", 2).await.unwrap();
    manager
        .register_processor("sync", "ok", |_job: Job, _| async move { Ok(()) })
        .await
        .unwrap();
    manager
        .register_processor("sync", "bad", |_job: Job, _| async move {
            Err::<(), _>(TaskhiveError::processor("nope"))
        })
        .await
        .unwrap();

    manager
        .add_job("sync", "ok", json!({}), JobOptions::new())
        .await
        .unwrap();
    manager
        .add_job("sync", "bad", json!({}), JobOptions::new())
        .await
        .unwrap();
    run_tick(&manager).await;

    let summary = collector
        .get_queue_statistics("sync", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(summary.started, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.failed, 0);
    assert!((summary.error_rate - 0.5).abs() < f64::EPSILON);
}

#[cfg(feature = "metrics")]
#[tokio::test]
async fn test_prometheus_metrics_track_jobs_and_depth() {
    use taskhive::{MetricsConfig, PrometheusMetricsCollector};

    let metrics = Arc::new(PrometheusMetricsCollector::new(MetricsConfig::default()).unwrap());
    let manager = QueueManager::builder(Arc::new(MemoryStore::new()))
        .metrics(metrics.clone())
        .build();

    manager.create_queue("email", 1).await.unwrap();
    manager
        .register_processor("email", "welcome", |_job: Job, _| async move { Ok(()) })
        .await
        .unwrap();
    for _ in 0..3 {
        manager
            .add_job("email", "welcome", json!({}), JobOptions::new())
            .await
            .unwrap();
    }
    run_tick(&manager).await;

    let text = manager.metrics().unwrap().get_metrics_text().unwrap();
    assert!(text.contains("taskhive_jobs_total{queue=\"email\",status=\"completed\"} 1"));
    assert!(text.contains("taskhive_queue_depth{queue=\"email\",state=\"waiting\"} 2"));
}
