//! # Orchestration
//!
//! The fan-out/fan-in scheduler. [`JobInitializer`] registers a job against
//! the records it needs, [`DependencyResolver`] reacts to each record
//! resolving, [`ProcessingEnqueuer`] promotes jobs that have nothing left to
//! wait for, and [`JobProcessor`] runs the analysis. [`StatusService`] is the
//! outward face, [`QueueConsumer`] drives the workers from the queues.

pub mod bootstrap;
pub mod consumer;
pub mod errors;
pub mod eta;
pub mod fan_in;
pub mod job_initializer;
pub mod job_processor;
pub mod processing_enqueuer;
pub mod status_service;

pub use bootstrap::{SchedulerAdapters, SchedulerComponents, SchedulerHandle};
pub use consumer::{BatchOutcome, FailedDelivery, QueueConsumer};
pub use errors::{OrchestrationError, ProcessingError};
pub use eta::{EtaCalculator, JobStatusReport, Milestone};
pub use fan_in::{DependencyResolver, FanInReport};
pub use job_initializer::{InitiationResult, JobInitializer};
pub use job_processor::{JobProcessor, ProcessOutcome};
pub use processing_enqueuer::ProcessingEnqueuer;
pub use status_service::{FullStatus, StatusService};
