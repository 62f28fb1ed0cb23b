//! Service state management and component initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ServiceConfig;
use event_buffer::{EventBuffer, QuestDbSink};
use queue_store::{QueueStore, RedisStore};
use realtime_broadcaster::{PostgresOnlineUsersProvider, RealtimeBroadcaster};
use sqlx::postgres::PgPoolOptions;
use telemetry_queue::{JobQueue, PostgresUsageSink, UsageEventBuffer};

/// Service state containing all initialized components.
///
/// The route layer receives clones of the buffer and broadcaster handles;
/// this struct owns the lifecycle.
pub struct ServiceState {
    /// Service configuration
    pub config: ServiceConfig,

    /// Shared queue store connection
    pub store: Arc<dyn QueueStore>,

    /// Event ingestion buffer
    pub event_buffer: EventBuffer,

    /// API-usage telemetry buffer
    pub usage_buffer: UsageEventBuffer,

    /// Background worker queue for usage batches
    pub job_queue: JobQueue,

    /// Realtime fan-out manager
    pub broadcaster: RealtimeBroadcaster,
}

impl ServiceState {
    /// Create a new service state with all components initialized
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing service components...");

        info!("Connecting to queue store...");
        let store: Arc<dyn QueueStore> = Arc::new(
            RedisStore::connect(&config.store.redis_url)
                .await
                .context("Failed to connect to the queue store")?,
        );

        info!("Connecting to relational database...");
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .context("Failed to connect to the relational database")?;

        info!("Initializing event buffer...");
        let sink = Arc::new(
            QuestDbSink::new(config.sink.clone()).context("Failed to build the analytical sink")?,
        );
        let event_buffer = EventBuffer::new(store.clone(), sink, config.event_buffer.clone());

        info!("Initializing telemetry queue...");
        let job_queue = JobQueue::start(Arc::new(PostgresUsageSink::new(pool.clone())));
        let usage_buffer =
            UsageEventBuffer::new(store.clone(), job_queue.submitter(), config.telemetry.clone());

        info!("Initializing realtime broadcaster...");
        let provider = Arc::new(PostgresOnlineUsersProvider::new(pool));
        let broadcaster = RealtimeBroadcaster::new(provider, config.realtime.clone());

        info!("Service components initialized");
        Ok(Self { config, store, event_buffer, usage_buffer, job_queue, broadcaster })
    }

    /// Start the timer-driven parts of the pipeline
    pub async fn start(&self) -> Result<()> {
        self.event_buffer.start().await;
        self.broadcaster.start().await;
        info!("Pulse pipeline running");
        Ok(())
    }

    /// Liveness probe against the queue store
    pub async fn health_check(&self) -> Result<()> {
        self.store.ping().await.context("Queue store unreachable")?;
        Ok(())
    }

    /// Ordered shutdown: stop fan-out, drain the telemetry backlog, then
    /// drain the event buffer with bounded retries.
    pub async fn shutdown(&self) -> Result<()> {
        self.broadcaster.stop().await;

        if let Err(e) = self.usage_buffer.close().await {
            error!("Failed to drain usage buffer: {}", e);
        }
        self.job_queue.close().await;

        self.event_buffer
            .flush_and_close()
            .await
            .context("Failed to drain the event buffer on shutdown")?;

        Ok(())
    }
}
