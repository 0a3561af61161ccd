use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::Environment;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize structured logging with JSON output, one object per line
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_target(true)
                .with_ansi(false),
        )
        .try_init()
        .wrap_err("Failed to install JSON log subscriber")?;

    tracing::debug!("Structured logging initialized");
    Ok(())
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install console log subscriber")?;

    tracing::debug!("Console logging initialized");
    Ok(())
}

/// Pick the output format for the environment: JSON lines in production so the log
/// aggregator can parse them, readable console output otherwise.
pub fn init_for_environment(environment: Environment) -> Result<()> {
    if environment.is_production() {
        init_tracing()
    } else {
        init_console_tracing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_is_an_error_not_a_panic() {
        let _ = init_for_environment(Environment::Development);
        // A global subscriber is now installed either way.
        assert!(init_for_environment(Environment::Production).is_err());
    }
}
