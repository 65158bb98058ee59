#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Opinions Core
//!
//! Fetch/job dependency scheduler for rating-history analysis.
//!
//! ## Overview
//!
//! Producing one user's analysis needs metadata for hundreds of upstream
//! records. Fetching them is slow and rate limited, and many users need the
//! same records at the same time. This crate caches records with expiry,
//! tracks which records each job still waits on, fetches each record once
//! no matter how many jobs want it, and moves each job from creation to
//! "ready to analyze" with queue-position based time estimates.
//!
//! ## Architecture
//!
//! Coordination is lock-free. Every state change is a conditional write
//! against a shared store, and losing a race is an ordinary branch.
//! Workers are stateless and consume an at-least-once queue, so every
//! operation tolerates duplicate and reordered delivery.
//!
//! ## Module Organization
//!
//! - [`models`] - Records, jobs, queue counters, list entries
//! - [`store`] - Record cache, job store and counters (in-memory, PostgreSQL)
//! - [`messaging`] - Work items, queue providers, dispatcher
//! - [`fetching`] - Upstream boundary, retry, rate limiting, TTL, fetch worker
//! - [`orchestration`] - Initiation, fan-in, processing, ETA, status, consumer
//! - [`artifacts`] - Snapshot and result storage
//! - [`analysis`] - Analysis boundary and missing-record tolerance
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use opinions_core::config::ConfigManager;
//! use opinions_core::orchestration::{SchedulerAdapters, SchedulerHandle};
//! # use std::sync::Arc;
//! # async fn example(
//! #     listing: Arc<dyn opinions_core::fetching::ListingSource>,
//! #     records: Arc<dyn opinions_core::fetching::RecordSource>,
//! #     analyzer: Arc<dyn opinions_core::analysis::Analyzer>,
//! # ) -> opinions_core::Result<()> {
//! opinions_core::logging::init_tracing();
//! let config = ConfigManager::load()?;
//! let adapters = SchedulerAdapters::from_config(config.config(), listing, records, analyzer).await?;
//! let mut scheduler = SchedulerHandle::start(config, adapters).await?;
//!
//! let report = scheduler.components.status.initiate("alice").await?;
//! println!("{} of {} records outstanding", report.remaining_records, report.total_records);
//!
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests live beside the code; integration tests under `tests/` run on
//! the in-memory adapters. PostgreSQL adapter tests are ignored unless a
//! `DATABASE_URL` is available:
//!
//! ```bash
//! cargo test
//! DATABASE_URL=postgres://localhost/opinions_test cargo test -- --ignored
//! ```

pub mod analysis;
pub mod artifacts;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetching;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod store;

pub mod test_helpers;

pub use config::{ConfigManager, OpinionsConfig};
pub use error::{OpinionsError, Result};
pub use models::{Job, JobStatus, Record, RecordId, RecordStatus, Username};
pub use orchestration::{
    FullStatus, JobStatusReport, Milestone, SchedulerAdapters, SchedulerComponents, SchedulerHandle,
};
