//! # Messaging
//!
//! Work items, the queue abstraction that carries them, and the dispatcher
//! that maps each kind of work to its queue.

pub mod dispatcher;
pub mod errors;
pub mod message;
pub mod service;

pub use dispatcher::WorkDispatcher;
pub use errors::MessagingError;
pub use message::{WorkKind, WorkMessage};
pub use service::{
    InMemoryMessagingService, MessageId, MessagingProvider, MessagingService, PgMessagingService,
    QueueMessage, QueueStats, QueuedMessage, ReceiptHandle,
};
