//! # Scheduler Bootstrap
//!
//! Wires adapters and configuration into the scheduler's components, and
//! runs the queue consumer as a background task with a shutdown handle.
//! The same assembly is used by deployments (PostgreSQL adapters) and by
//! tests and local runs (in-memory adapters).

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::consumer::QueueConsumer;
use super::eta::EtaCalculator;
use super::fan_in::DependencyResolver;
use super::job_initializer::JobInitializer;
use super::job_processor::JobProcessor;
use super::processing_enqueuer::ProcessingEnqueuer;
use super::status_service::StatusService;
use crate::analysis::{Analyzer, MissingRecordPolicy};
use crate::artifacts::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
use crate::config::{ConfigManager, ConfigurationError, OpinionsConfig, StorageBackend};
use crate::error::Result;
use crate::fetching::{ListingSource, RateLimitGate, RecordFetchWorker, RecordSource, TtlPolicy};
use crate::messaging::{InMemoryMessagingService, MessagingProvider, PgMessagingService, WorkDispatcher};
use crate::store::{InMemoryStore, PostgresStore, StoreHandles};

/// Everything the scheduler talks to outside its own logic
#[derive(Clone)]
pub struct SchedulerAdapters {
    pub stores: StoreHandles,
    pub messaging: MessagingProvider,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub listing: Arc<dyn ListingSource>,
    pub records: Arc<dyn RecordSource>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl std::fmt::Debug for SchedulerAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerAdapters")
            .field("stores", &self.stores)
            .field("messaging", &self.messaging.provider_name())
            .finish_non_exhaustive()
    }
}

impl SchedulerAdapters {
    /// Build storage, messaging and artifact adapters for the configured
    /// backend around the given upstream and analysis collaborators
    pub async fn from_config(
        config: &OpinionsConfig,
        listing: Arc<dyn ListingSource>,
        records: Arc<dyn RecordSource>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self> {
        let (stores, messaging, artifacts): (StoreHandles, MessagingProvider, Arc<dyn ArtifactStore>) =
            match config.storage.backend {
                StorageBackend::InMemory => (
                    StoreHandles::shared(Arc::new(InMemoryStore::new())),
                    Arc::new(InMemoryMessagingService::new()).into(),
                    Arc::new(InMemoryArtifactStore::new()),
                ),
                StorageBackend::Postgres => {
                    let url = config.storage.database_url.as_deref().ok_or_else(|| {
                        ConfigurationError::missing_required_field("database_url", "storage (backend = postgres)")
                    })?;
                    let store = PostgresStore::connect(url, config.storage.max_connections).await?;
                    store.ensure_schema().await?;
                    let messaging = Arc::new(PgMessagingService::new(store.pool().clone()));
                    (
                        StoreHandles::shared(Arc::new(store)),
                        messaging.into(),
                        Arc::new(FsArtifactStore::new(&config.storage.artifact_directory)),
                    )
                }
            };

        info!(
            backend = ?config.storage.backend,
            messaging = messaging.provider_name(),
            "Scheduler adapters ready"
        );
        Ok(Self {
            stores,
            messaging,
            artifacts,
            listing,
            records,
            analyzer,
        })
    }
}

/// The assembled scheduler
#[derive(Clone)]
pub struct SchedulerComponents {
    pub stores: StoreHandles,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub dispatcher: WorkDispatcher,
    pub initializer: Arc<JobInitializer>,
    pub fetch_worker: Arc<RecordFetchWorker>,
    pub processor: Arc<JobProcessor>,
    pub status: Arc<StatusService>,
    pub consumer: Arc<QueueConsumer>,
    pub eta: EtaCalculator,
}

impl std::fmt::Debug for SchedulerComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerComponents")
            .field("dispatcher", &self.dispatcher)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

impl SchedulerComponents {
    pub fn assemble(config: &OpinionsConfig, adapters: SchedulerAdapters) -> Self {
        let SchedulerAdapters {
            stores,
            messaging,
            artifacts,
            listing,
            records,
            analyzer,
        } = adapters;

        let dispatcher = WorkDispatcher::new(messaging, &config.queues);
        let enqueuer = ProcessingEnqueuer::new(stores.clone(), dispatcher.clone());
        let resolver = DependencyResolver::new(stores.clone(), enqueuer.clone());
        let gate = Arc::new(RateLimitGate::new(config.fetch.min_request_interval()));
        let eta = EtaCalculator::new(config.eta.clone());

        let initializer = Arc::new(JobInitializer::new(
            stores.clone(),
            artifacts.clone(),
            dispatcher.clone(),
            enqueuer,
            config.initiation.concurrency,
        ));
        let fetch_worker = Arc::new(RecordFetchWorker::new(
            stores.clone(),
            records,
            resolver,
            gate,
            &config.fetch,
            TtlPolicy::new(config.ttl.clone()),
        ));
        let processor = Arc::new(JobProcessor::new(
            stores.clone(),
            artifacts.clone(),
            analyzer,
            MissingRecordPolicy::from_config(&config.analysis),
        ));
        let status = Arc::new(StatusService::new(
            stores.clone(),
            artifacts.clone(),
            listing,
            initializer.clone(),
            eta.clone(),
        ));
        let consumer = Arc::new(QueueConsumer::new(
            dispatcher.clone(),
            fetch_worker.clone(),
            processor.clone(),
            &config.queues,
            &config.processing,
        ));

        Self {
            stores,
            artifacts,
            dispatcher,
            initializer,
            fetch_worker,
            processor,
            status,
            consumer,
            eta,
        }
    }
}

/// A running scheduler: components plus the background consumer task
#[derive(Debug)]
pub struct SchedulerHandle {
    pub components: SchedulerComponents,
    pub config_manager: Arc<ConfigManager>,
    shutdown_sender: Option<watch::Sender<bool>>,
    consumer_task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Ensure the queues exist and start consuming them
    pub async fn start(config_manager: Arc<ConfigManager>, adapters: SchedulerAdapters) -> Result<Self> {
        let components = SchedulerComponents::assemble(config_manager.config(), adapters);
        components.dispatcher.ensure_queues().await?;

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let consumer = components.consumer.clone();
        let consumer_task = tokio::spawn(async move { consumer.run_until(shutdown_receiver).await });

        info!(environment = config_manager.environment(), "Scheduler started");
        Ok(Self {
            components,
            config_manager,
            shutdown_sender: Some(shutdown_sender),
            consumer_task: Some(consumer_task),
        })
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    /// Signal the consumer to stop and wait for its current batch to finish
    pub async fn stop(&mut self) {
        let Some(sender) = self.shutdown_sender.take() else {
            warn!("Scheduler already stopped");
            return;
        };
        // A closed channel means the consumer already exited
        let _ = sender.send(true);
        if let Some(task) = self.consumer_task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Consumer task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}
