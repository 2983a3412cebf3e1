use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskhiveError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Queue not found: {name}")]
    QueueNotFound { name: String },

    #[error("No processor registered for job '{job_name}' on queue '{queue_name}'")]
    ProcessorMissing {
        queue_name: String,
        job_name: String,
    },

    #[error("Job timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Processor error: {message}")]
    Processor { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dispatcher error: {message}")]
    Dispatcher { message: String },

    #[error("Metrics error: {message}")]
    Metrics { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TaskhiveError {
    /// Build a processor failure from anything printable.
    ///
    /// Processors return this to signal that the job should go through the
    /// retry/failed path.
    pub fn processor(message: impl Into<String>) -> Self {
        TaskhiveError::Processor {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        TaskhiveError::Validation {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        TaskhiveError::Store {
            message: message.into(),
        }
    }

    /// True for errors that mean a record could not be decoded.
    pub fn is_malformed_record(&self) -> bool {
        matches!(self, TaskhiveError::Serialization(_))
    }
}

impl From<toml::de::Error> for TaskhiveError {
    fn from(err: toml::de::Error) -> Self {
        TaskhiveError::Config(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for TaskhiveError {
    fn from(err: toml::ser::Error) -> Self {
        TaskhiveError::Config(format!("TOML serialization error: {}", err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for TaskhiveError {
    fn from(err: redis::RedisError) -> Self {
        TaskhiveError::store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let validation = TaskhiveError::validation("priority must be between 1 and 10");
        assert_eq!(
            validation.to_string(),
            "Validation error: priority must be between 1 and 10"
        );

        let not_found = TaskhiveError::JobNotFound {
            id: "test-id".to_string(),
        };
        assert_eq!(not_found.to_string(), "Job not found: test-id");

        let missing = TaskhiveError::ProcessorMissing {
            queue_name: "email".to_string(),
            job_name: "welcome".to_string(),
        };
        assert_eq!(
            missing.to_string(),
            "No processor registered for job 'welcome' on queue 'email'"
        );
    }

    #[test]
    fn test_timeout_display() {
        let error = TaskhiveError::Timeout {
            timeout: Duration::from_millis(50),
        };
        assert_eq!(error.to_string(), "Job timed out after 50ms");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_error.is_err());

        let error: TaskhiveError = json_error.unwrap_err().into();
        assert!(matches!(error, TaskhiveError::Serialization(_)));
        assert!(error.is_malformed_record());
    }

    #[test]
    fn test_error_from_toml() {
        let toml_error = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let error: TaskhiveError = toml_error.into();
        assert!(matches!(error, TaskhiveError::Config(_)));
        assert!(error.to_string().contains("TOML deserialization error"));
    }
}
