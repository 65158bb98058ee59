//! # Structured Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem. Logs go to
//! stdout; containers and the local shell capture them.
//!
//! `OPINIONS_ENV` selects the environment (default `development`) and with it
//! the default level. `RUST_LOG` overrides the level when set. Configuration
//! may switch the formatter to JSON lines for log shippers.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::{LogFormat, LoggingConfig};
use crate::models::{RecordId, Username};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging with defaults for the detected environment
pub fn init_tracing() {
    init_tracing_with(&LoggingConfig::default());
}

/// Initialize console logging from the `logging` configuration section.
///
/// Only the first call installs a subscriber. Later calls, or a subscriber
/// installed by a host process, are left alone.
pub fn init_tracing_with(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment));
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                ansi_colors = use_ansi,
                format = ?config.format,
                "Console logging initialized"
            );
        }
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var("OPINIONS_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
pub fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for job lifecycle operations
pub fn log_job_operation(
    operation: &str,
    username: &Username,
    correlation_id: Option<Uuid>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        correlation_id = ?correlation_id,
        operation = %operation,
        username = %username,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}

/// Log structured data for record cache operations
pub fn log_record_operation(
    operation: &str,
    record_id: RecordId,
    status: &str,
    dependents: usize,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        record_id = %record_id,
        status = %status,
        dependents = dependents,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "RECORD_OPERATION"
    );
}

/// Log structured data for queue operations
pub fn log_queue_operation(
    operation: &str,
    queue_name: &str,
    position: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        queue_name = %queue_name,
        position = position,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "QUEUE_OPERATION"
    );
}

/// Log structured data for errors that are handled rather than propagated
pub fn log_error(component: &str, operation: &str, error: &dyn std::error::Error, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_by_environment() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing_with(&LoggingConfig {
            format: LogFormat::Json,
            level: Some("warn".to_string()),
        });
    }
}
