//! # Messaging Service
//!
//! Provider-agnostic queue abstraction: a trait with generic send/receive,
//! an in-memory and a PostgreSQL provider, and an enum that dispatches
//! between them.

pub mod provider;
pub mod providers;
pub mod traits;
pub mod types;

pub use provider::MessagingProvider;
pub use providers::{InMemoryMessagingService, PgMessagingService};
pub use traits::{MessagingService, QueueMessage};
pub use types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
