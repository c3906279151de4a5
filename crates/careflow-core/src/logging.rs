//! Structured logging using tracing.

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{config::OrchestratorConfig, CoreError};

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &OrchestratorConfig) -> Result<(), CoreError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().pretty().with_target(true))
            .try_init()
    };

    result.map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to set global default subscriber: {}", e))
    })?;

    info!(
        json_logs = config.json_logs,
        filter = %config.log_filter,
        "Logging initialized"
    );

    Ok(())
}
