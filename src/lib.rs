//! # Taskhive
//!
//! An async background job runtime for Rust: named queues with per-queue
//! concurrency limits, priority scheduling, delayed execution, retry with
//! backoff and a dead-letter (failed) index for operator review.
//!
//! ## Features
//!
//! - **Priority scheduling**: priorities 1 (highest) to 10 (lowest), FIFO within a priority
//! - **Delayed jobs**: run no earlier than a given delay after they were added
//! - **Bounded concurrency**: each queue runs at most `concurrency` jobs at once
//! - **Retries**: fixed or exponential backoff with optional jitter
//! - **Timeouts**: per-job timeouts with a configurable default
//! - **Failed index**: exhausted jobs kept for inspection, manual retry or clearing
//! - **Pluggable storage**: in-memory store, or Redis with the `redis` feature
//! - **Monitoring**: time-windowed statistics and Prometheus metrics (default)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskhive::{Job, JobOptions, QueueManager, Result, TaskhiveConfig};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Welcome {
//!     user_id: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = TaskhiveConfig::from_env()?;
//!     taskhive::logging::init_logging(&config.logging)?;
//!
//!     let manager = QueueManager::from_config(config).await?;
//!     manager.create_queue("email", 4).await?;
//!
//!     manager
//!         .register_processor("email", "welcome", |job: Job<Welcome>, progress| async move {
//!             progress.report(50).await;
//!             // send the email for job.payload.user_id
//!             Ok(format!("welcomed {}", job.payload.user_id))
//!         })
//!         .await?;
//!
//!     manager.start().await?;
//!
//!     let id = manager
//!         .add_job(
//!             "email",
//!             "welcome",
//!             Welcome { user_id: 7 },
//!             JobOptions::new().with_priority(1).with_timeout(Duration::from_secs(30)),
//!         )
//!         .await?;
//!
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!     println!("job {} is {}", id, manager.get_job(id).await?.status);
//!
//!     manager.stop(true).await
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Jobs
//!
//! A job is a named unit of work in one queue. It carries a JSON payload, its
//! [`JobOptions`] and its lifecycle state: `waiting`, `delayed`, `active`,
//! `completed` or `failed`.
//!
//! ### Dispatcher
//!
//! A single loop per [`QueueManager`] promotes delayed jobs whose time has
//! come and fills free concurrency slots from the waiting index. Each claimed
//! job runs as its own tokio task. [`QueueManager::tick`] runs one pass by
//! hand, which is how the tests drive it.
//!
//! ### Storage
//!
//! Everything persisted goes through the [`store::JobStore`] trait: job
//! records with a TTL, integer-scored sorted sets for the indices and scalar
//! counters.
//!
//! ## Feature Flags
//!
//! - `metrics` - Enable Prometheus metrics collection (default)
//! - `redis` - Enable the Redis job store

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
mod executor;
pub mod job;
pub mod logging;
pub mod manager;
pub mod priority;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use clock::{Clock, MockClock};
pub use config::{DispatcherConfig, JobsConfig, LoggingConfig, StoreConfig, TaskhiveConfig};
pub use dispatcher::TickReport;
pub use error::TaskhiveError;
pub use job::{Job, JobId, JobOptions, JobStatus};
pub use manager::{NewJob, QueueManager, QueueManagerBuilder};
pub use priority::JobPriority;
pub use registry::{Processor, ProgressReporter, QueueConfig, QueueRegistry};
pub use retry::{BackoffStrategy, JitterType};
pub use stats::{
    InMemoryStatsCollector, JobEvent, JobEventType, JobStatistics, QueueStats,
    StatisticsCollector, StatsConfig,
};
pub use store::{JobStore, Keys, MemoryStore, Order};

#[cfg(feature = "metrics")]
pub use metrics::{MetricsConfig, PrometheusMetricsCollector};

#[cfg(feature = "redis")]
pub use store::RedisStore;

/// Convenient type alias for Results with [`TaskhiveError`] as the error type.
pub type Result<T> = std::result::Result<T, TaskhiveError>;
