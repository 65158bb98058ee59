//! # Work Dispatcher
//!
//! Enqueues fetch and process work items onto their configured queues.

use tracing::{debug, instrument};

use super::message::{WorkKind, WorkMessage};
use super::service::{MessageId, MessagingProvider};
use super::MessagingError;
use crate::config::QueuesConfig;
use crate::models::{RecordId, Username};

#[derive(Debug, Clone)]
pub struct WorkDispatcher {
    provider: MessagingProvider,
    fetch_queue: String,
    processing_queue: String,
}

impl WorkDispatcher {
    pub fn new(provider: MessagingProvider, config: &QueuesConfig) -> Self {
        Self {
            provider,
            fetch_queue: config.fetch_queue.clone(),
            processing_queue: config.processing_queue.clone(),
        }
    }

    pub fn provider(&self) -> &MessagingProvider {
        &self.provider
    }

    pub fn queue_for(&self, kind: WorkKind) -> &str {
        match kind {
            WorkKind::Fetch => &self.fetch_queue,
            WorkKind::Process => &self.processing_queue,
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        vec![self.fetch_queue.clone(), self.processing_queue.clone()]
    }

    pub async fn ensure_queues(&self) -> Result<(), MessagingError> {
        self.provider.ensure_queues(&self.queue_names()).await
    }

    #[instrument(skip(self), fields(record_id = %id))]
    pub async fn dispatch_fetch(&self, id: RecordId) -> Result<MessageId, MessagingError> {
        self.dispatch(WorkMessage::Fetch { id }).await
    }

    #[instrument(skip(self), fields(username = %username))]
    pub async fn dispatch_process(&self, username: &Username) -> Result<MessageId, MessagingError> {
        self.dispatch(WorkMessage::Process {
            username: username.clone(),
        })
        .await
    }

    async fn dispatch(&self, message: WorkMessage) -> Result<MessageId, MessagingError> {
        let queue_name = self.queue_for(message.kind());
        let message_id = self.provider.send_message(queue_name, &message).await?;
        debug!(queue_name, message_id = %message_id, kind = %message.kind(), "Dispatched work item");
        Ok(message_id)
    }
}
