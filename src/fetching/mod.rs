//! # Fetching
//!
//! The upstream boundary (listing and per-record metadata sources) and the
//! worker that turns one fetch work item into a cached or failed record.

pub mod rate_limit;
pub mod record_fetch_worker;
pub mod retry;
pub mod source;
pub mod ttl;

pub use rate_limit::RateLimitGate;
pub use record_fetch_worker::{FetchOutcome, RecordFetchWorker};
pub use retry::RetryPolicy;
pub use source::{AiringStatus, ListingSource, RawRecord, RecordSource, UpstreamError};
pub use ttl::TtlPolicy;
