//! Process-wide log subscriber setup.

use crate::{Result, TaskhiveError, config::LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber configured from `config`.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`. Returns
/// `Ok(false)` when a global subscriber was already installed, so calling it
/// more than once is harmless.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            TaskhiveError::Config(format!("invalid log level '{}': {}", config.level, e))
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let installed = if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }
}
