//! Configuration management for the taskhive runtime.
//!
//! A [`TaskhiveConfig`] can be built in code, loaded from a TOML file or read
//! from `TASKHIVE_*` environment variables. Durations are written in a
//! human-readable form (`"250ms"`, `"30s"`, `"5m"`, `"1h"`, `"7d"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serialize `Duration` as human-readable strings.
mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        let secs = duration.as_secs();
        if millis == 0 {
            serializer.serialize_str("0s")
        } else if millis % 1000 != 0 {
            serializer.serialize_str(&format!("{}ms", millis))
        } else if secs % 86400 == 0 {
            serializer.serialize_str(&format!("{}d", secs / 86400))
        } else if secs % 3600 == 0 {
            serializer.serialize_str(&format!("{}h", secs / 3600))
        } else if secs % 60 == 0 {
            serializer.serialize_str(&format!("{}m", secs / 60))
        } else {
            serializer.serialize_str(&format!("{}s", secs))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(D::Error::custom)
    }

    /// Parse a duration string like "250ms", "30s", "5m", "1h", "7d" or "90".
    /// A bare number is read as seconds.
    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();

        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        if let Some(num_str) = s.strip_suffix("ms") {
            let num: u64 = num_str
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
            return Ok(Duration::from_millis(num));
        }

        if s.len() < 2 {
            return Err(format!("Invalid duration format: {}", s));
        }

        let (num_str, suffix) = s.split_at(s.len() - 1);
        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

        let unit_secs: u64 = match suffix {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86400,
            _ => {
                return Err(format!(
                    "Invalid duration suffix: {}. Use ms, s, m, h, or d",
                    suffix
                ));
            }
        };
        num.checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("Duration out of range: {}", s))
    }
}

/// Main configuration for a [`QueueManager`](crate::QueueManager).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskhiveConfig {
    pub dispatcher: DispatcherConfig,
    pub jobs: JobsConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl TaskhiveConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.dispatcher.poll_interval = interval;
        self
    }

    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.dispatcher.default_concurrency = concurrency;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher.shutdown_timeout = timeout;
        self
    }

    pub fn with_default_job_timeout(mut self, timeout: Duration) -> Self {
        self.jobs.default_timeout = timeout;
        self
    }

    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.jobs.ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store.key_prefix = prefix.into();
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.store.redis_url = Some(url.into());
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> crate::Result<()> {
        if let Some(interval) = lookup("TASKHIVE_POLL_INTERVAL") {
            self.dispatcher.poll_interval = parse_env_duration("TASKHIVE_POLL_INTERVAL", &interval)?;
        }
        if let Some(concurrency) = lookup("TASKHIVE_DEFAULT_CONCURRENCY") {
            self.dispatcher.default_concurrency = concurrency
                .parse()
                .unwrap_or(self.dispatcher.default_concurrency);
        }
        if let Some(timeout) = lookup("TASKHIVE_SHUTDOWN_TIMEOUT") {
            self.dispatcher.shutdown_timeout =
                parse_env_duration("TASKHIVE_SHUTDOWN_TIMEOUT", &timeout)?;
        }

        if let Some(timeout) = lookup("TASKHIVE_JOB_TIMEOUT") {
            self.jobs.default_timeout = parse_env_duration("TASKHIVE_JOB_TIMEOUT", &timeout)?;
        }
        if let Some(ttl) = lookup("TASKHIVE_JOB_TTL") {
            self.jobs.ttl = parse_env_duration("TASKHIVE_JOB_TTL", &ttl)?;
        }

        if let Some(prefix) = lookup("TASKHIVE_KEY_PREFIX") {
            self.store.key_prefix = prefix;
        }
        if let Some(url) = lookup("TASKHIVE_REDIS_URL") {
            self.store.redis_url = Some(url);
        }

        if let Some(level) = lookup("TASKHIVE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("TASKHIVE_LOG_JSON") {
            self.logging.json_format = json.parse().unwrap_or(self.logging.json_format);
        }

        Ok(())
    }

    /// Create a configuration for development use
    pub fn development() -> Self {
        Self {
            dispatcher: DispatcherConfig {
                poll_interval: Duration::from_millis(100),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                include_location: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration for production use
    pub fn production() -> Self {
        Self {
            dispatcher: DispatcherConfig {
                default_concurrency: 4,
                shutdown_timeout: Duration::from_secs(60),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_env_duration(key: &str, value: &str) -> crate::Result<Duration> {
    duration_human::parse_duration(value)
        .map_err(|e| crate::TaskhiveError::Config(format!("{}: {}", key, e)))
}

/// Dispatcher loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Time between dispatcher ticks
    #[serde(with = "duration_human")]
    pub poll_interval: Duration,

    /// Concurrency for queues created implicitly by `register_processor`
    pub default_concurrency: usize,

    /// Upper bound on how long `stop(true)` waits for in-flight jobs
    #[serde(with = "duration_human")]
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            default_concurrency: 1,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Job defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Processor timeout for jobs that do not set their own
    #[serde(with = "duration_human")]
    pub default_timeout: Duration,

    /// Time-to-live of every job record, refreshed on each write
    #[serde(with = "duration_human")]
    pub ttl: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            ttl: Duration::from_secs(7 * 86400),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Prepended to every persisted key
    pub key_prefix: String,

    /// Redis connection URL, used by the `redis` feature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Whether to enable structured JSON logging
    pub json_format: bool,

    /// Whether to include file and line information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}
