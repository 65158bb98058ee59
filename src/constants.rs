//! # System Constants
//!
//! Defaults shared by configuration, storage adapters and the estimator.
//! Configuration files override the tunable ones; the storage constants are
//! part of the persisted format and are not configurable.

/// Queue names used when configuration does not override them
pub mod queues {
    pub const DEFAULT_FETCH_QUEUE: &str = "record_fetch";
    pub const DEFAULT_PROCESSING_QUEUE: &str = "job_processing";
    pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u64 = 60;
    pub const DEFAULT_BATCH_SIZE: usize = 10;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
    /// Deliveries of one fetch item before its record is marked failed
    pub const MAX_FETCH_DELIVERIES: u32 = 5;
}

/// Persisted-format constants
pub mod storage {
    /// Backends that cannot store an empty set keep this member in every
    /// persisted set. It is stripped on read and never surfaces in the domain.
    pub const SET_PLACEHOLDER: &str = "";

    /// Maximum keys per bulk read round-trip
    pub const BULK_READ_BATCH_SIZE: usize = 100;
}

/// Upstream fetch defaults
pub mod fetch {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_DELAY_MS: u64 = 2_000;
    pub const MIN_REQUEST_INTERVAL_MS: u64 = 1_000;
    /// One record fetch issues this many upstream requests
    pub const REQUESTS_PER_FETCH: u32 = 2;
}

/// Cache lifetimes for fetched records
pub mod ttl {
    pub const AIRING_DAYS: i64 = 7;
    pub const RECENTLY_FINISHED_DAYS: i64 = 30;
    pub const FINISHED_DAYS: i64 = 90;
    pub const RECENT_WINDOW_DAYS: i64 = 365;
    pub const FAILURE_HOURS: i64 = 24;
}

/// Queue-position estimation defaults
pub mod estimates {
    pub const INITIALISATION_SECONDS: i64 = 10;
    pub const SECONDS_PER_RECORD: i64 = 2;
    pub const SECONDS_PER_JOB: i64 = 5;
    pub const MILESTONE_LATENCY_SECONDS: i64 = 0;
}

/// Job initiation defaults
pub mod initiation {
    pub const CONCURRENCY: usize = 16;
}

/// Processing defaults
pub mod processing {
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Tolerate any fraction of missing records unless configured otherwise
    pub const MAX_MISSING_FRACTION: f64 = 1.0;
}
