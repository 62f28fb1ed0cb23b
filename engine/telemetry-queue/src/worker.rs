//! Background worker performing the relational inserts

use crate::error::Result;
use crate::queue::{BatchJob, WorkerCommand, WorkerMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A fully-attributed usage event ready for insertion
#[derive(Debug, Clone)]
pub struct UsageEventRow {
    pub id: String,
    pub route: String,
    pub status: i32,
    pub processing_time_ms: i64,
    pub error_flag: bool,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub user_id: String,
    pub apikey_id: String,
}

/// Insert target for usage-event rows
#[async_trait]
pub trait UsageEventSink: Send + Sync {
    async fn insert_rows(&self, rows: &[UsageEventRow]) -> Result<()>;
}

/// Production sink writing to the `api_events` table
pub struct PostgresUsageSink {
    pool: PgPool,
}

impl PostgresUsageSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageEventSink for PostgresUsageSink {
    async fn insert_rows(&self, rows: &[UsageEventRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO api_events \
             (id, route, status, processing_time_ms, error_flag, timestamp, version, user_id, apikey_id) ",
        );
        builder.push_values(rows, |mut value, row| {
            value
                .push_bind(&row.id)
                .push_bind(&row.route)
                .push_bind(row.status)
                .push_bind(row.processing_time_ms)
                .push_bind(row.error_flag)
                .push_bind(row.timestamp)
                .push_bind(&row.version)
                .push_bind(&row.user_id)
                .push_bind(&row.apikey_id);
        });
        builder.push(" ON CONFLICT (id) DO NOTHING");

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory sink for tests and the integration driver
#[derive(Default)]
pub struct MemoryUsageSink {
    rows: std::sync::Mutex<Vec<UsageEventRow>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl MemoryUsageSink {
    /// Make the next insert fail once
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<UsageEventRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageEventSink for MemoryUsageSink {
    async fn insert_rows(&self, rows: &[UsageEventRow]) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(crate::error::QueueError::SinkUnavailable("injected failure".to_string()));
        }
        self.rows.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }
}

/// Worker loop: drain batch jobs until shutdown, never exiting on a job error
pub(crate) async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<WorkerCommand>,
    sink: Arc<dyn UsageEventSink>,
    metrics: Arc<WorkerMetrics>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            WorkerCommand::Process(job) => {
                match process_batch_job(sink.as_ref(), &metrics, &job).await {
                    Ok(inserted) => {
                        metrics.completed.fetch_add(1, Ordering::Relaxed);
                        metrics.inserted.fetch_add(inserted, Ordering::Relaxed);
                        debug!("Processed batch {} ({} rows)", job.batch_id, inserted);
                    }
                    Err(err) => {
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        error!("Batch {} failed: {}", job.batch_id, err);
                    }
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }

    debug!("Usage worker stopped");
}

async fn process_batch_job(
    sink: &dyn UsageEventSink,
    metrics: &WorkerMetrics,
    job: &BatchJob,
) -> Result<u64> {
    let mut rows = Vec::with_capacity(job.events.len());

    for event in &job.events {
        if !event.has_attribution() {
            warn!(
                "Skipping legacy usage event without userId/apikeyId: route={} timestamp={}",
                event.route, event.timestamp
            );
            metrics.skipped_legacy.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let Some(timestamp) = DateTime::from_timestamp_millis(event.timestamp) else {
            warn!("Skipping usage event for {} with out-of-range timestamp", event.route);
            continue;
        };

        rows.push(UsageEventRow {
            id: format!("evt_{}", Uuid::new_v4()),
            route: event.route.clone(),
            status: i32::from(event.status),
            processing_time_ms: event.processing_time_ms as i64,
            error_flag: event.error_flag,
            timestamp,
            version: event.version.clone().unwrap_or_default(),
            user_id: event.user_id.clone().unwrap_or_default(),
            apikey_id: event.apikey_id.clone().unwrap_or_default(),
        });
    }

    if rows.is_empty() {
        warn!("No valid events to process in batch {}", job.batch_id);
        return Ok(0);
    }

    let inserted = rows.len() as u64;
    sink.insert_rows(&rows).await?;
    Ok(inserted)
}
