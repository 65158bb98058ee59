//! # Configuration
//!
//! Typed configuration for the scheduler. Every section has defaults, so a
//! partial file (or none of a section) is valid. See [`loader`] for file
//! discovery and environment overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants;

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpinionsConfig {
    pub queues: QueuesConfig,
    pub fetch: FetchConfig,
    pub ttl: TtlConfig,
    pub eta: EtaConfig,
    pub processing: ProcessingConfig,
    pub analysis: AnalysisConfig,
    pub initiation: InitiationConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl OpinionsConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, name) in [
            ("queues.fetch_queue", &self.queues.fetch_queue),
            ("queues.processing_queue", &self.queues.processing_queue),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(field, name, "queue names must not be empty"));
            }
        }
        if self.queues.fetch_queue == self.queues.processing_queue {
            return Err(ConfigurationError::invalid_value(
                "queues.processing_queue",
                &self.queues.processing_queue,
                "fetch and processing work must use different queues",
            ));
        }
        if self.queues.batch_size == 0 {
            return Err(ConfigurationError::invalid_value("queues.batch_size", 0, "must be at least 1"));
        }
        if self.queues.max_fetch_deliveries == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.max_fetch_deliveries",
                0,
                "must be at least 1",
            ));
        }
        if self.fetch.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value("fetch.max_attempts", 0, "must be at least 1"));
        }
        if self.processing.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "processing.max_attempts",
                0,
                "must be at least 1",
            ));
        }
        if self.initiation.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "initiation.concurrency",
                0,
                "must be at least 1",
            ));
        }
        let fraction = self.analysis.max_missing_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigurationError::invalid_value(
                "analysis.max_missing_fraction",
                fraction,
                "must be between 0.0 and 1.0",
            ));
        }
        if self.storage.backend == StorageBackend::Postgres && self.storage.database_url.is_none() {
            return Err(ConfigurationError::missing_required_field(
                "database_url",
                "storage (backend = postgres)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub fetch_queue: String,
    pub processing_queue: String,
    pub visibility_timeout_seconds: u64,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub max_fetch_deliveries: u32,
}

impl QueuesConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            fetch_queue: constants::queues::DEFAULT_FETCH_QUEUE.to_string(),
            processing_queue: constants::queues::DEFAULT_PROCESSING_QUEUE.to_string(),
            visibility_timeout_seconds: constants::queues::DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            batch_size: constants::queues::DEFAULT_BATCH_SIZE,
            poll_interval_ms: constants::queues::DEFAULT_POLL_INTERVAL_MS,
            max_fetch_deliveries: constants::queues::MAX_FETCH_DELIVERIES,
        }
    }
}

/// Upstream fetch retry and rate limiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Minimum spacing between upstream requests across all workers
    pub min_request_interval_ms: u64,
    pub requests_per_fetch: u32,
}

impl FetchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::fetch::MAX_ATTEMPTS,
            retry_delay_ms: constants::fetch::RETRY_DELAY_MS,
            min_request_interval_ms: constants::fetch::MIN_REQUEST_INTERVAL_MS,
            requests_per_fetch: constants::fetch::REQUESTS_PER_FETCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub airing_days: i64,
    pub recently_finished_days: i64,
    pub finished_days: i64,
    pub recent_window_days: i64,
    pub failure_hours: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            airing_days: constants::ttl::AIRING_DAYS,
            recently_finished_days: constants::ttl::RECENTLY_FINISHED_DAYS,
            finished_days: constants::ttl::FINISHED_DAYS,
            recent_window_days: constants::ttl::RECENT_WINDOW_DAYS,
            failure_hours: constants::ttl::FAILURE_HOURS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtaConfig {
    pub initialisation_seconds: i64,
    pub seconds_per_record: i64,
    pub seconds_per_job: i64,
    pub milestone_latency_seconds: i64,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            initialisation_seconds: constants::estimates::INITIALISATION_SECONDS,
            seconds_per_record: constants::estimates::SECONDS_PER_RECORD,
            seconds_per_job: constants::estimates::SECONDS_PER_JOB,
            milestone_latency_seconds: constants::estimates::MILESTONE_LATENCY_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Deliveries of one processing message before it is dead-lettered
    pub max_attempts: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::processing::MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Largest tolerated fraction of required records that are missing or failed
    pub max_missing_fraction: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_missing_fraction: constants::processing::MAX_MISSING_FRACTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiationConfig {
    /// In-flight store writes while registering one job's dependencies
    pub concurrency: usize,
}

impl Default for InitiationConfig {
    fn default() -> Self {
        Self {
            concurrency: constants::initiation::CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub artifact_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::InMemory,
            database_url: None,
            max_connections: 10,
            artifact_directory: "data/artifacts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Overrides the per-environment default level
    pub level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OpinionsConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.fetch.requests_per_fetch, 2);
        assert_eq!(config.eta.seconds_per_job, 5);
        assert_eq!(config.analysis.max_missing_fraction, 1.0);
    }

    #[test]
    fn test_rejects_shared_queue() {
        let mut config = OpinionsConfig::default();
        config.queues.processing_queue = config.queues.fetch_queue.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_tolerance() {
        let mut config = OpinionsConfig::default();
        config.analysis.max_missing_fraction = f64::NAN;
        assert!(config.validate().is_err());
        config.analysis.max_missing_fraction = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_postgres_needs_url() {
        let mut config = OpinionsConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
        config.storage.database_url = Some("postgres://localhost/opinions".to_string());
        config.validate().unwrap();
    }
}
