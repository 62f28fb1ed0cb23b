//! Background job queue for usage-event batches

use crate::error::{QueueError, Result};
use crate::event::ApiUsageEvent;
use crate::worker::{run_worker, UsageEventSink};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

/// An immutable batch handed to the worker exactly once.
/// The relational insert is duplicate-tolerant, so redelivery by an outer
/// retry stays safe.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub events: Vec<ApiUsageEvent>,
    pub batch_id: String,
}

pub(crate) enum WorkerCommand {
    Process(BatchJob),
    Shutdown,
}

#[derive(Default)]
pub(crate) struct WorkerMetrics {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) skipped_legacy: AtomicU64,
    pub(crate) inserted: AtomicU64,
}

/// Point-in-time worker counters for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerMetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped_legacy: u64,
    pub inserted: u64,
}

/// Cloneable handle for submitting batch jobs to the worker
#[derive(Clone)]
pub struct JobSubmitter {
    sender: mpsc::UnboundedSender<WorkerCommand>,
    metrics: Arc<WorkerMetrics>,
    closed: Arc<AtomicBool>,
}

impl JobSubmitter {
    /// Submit one batch. Returns the generated batch id.
    pub fn submit(&self, events: Vec<ApiUsageEvent>) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let batch_id = format!("batch_{}", Uuid::new_v4());
        let job = BatchJob { events, batch_id: batch_id.clone() };

        self.sender.send(WorkerCommand::Process(job)).map_err(|_| QueueError::Closed)?;
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(batch_id)
    }

    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            submitted: self.metrics.submitted.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            skipped_legacy: self.metrics.skipped_legacy.load(Ordering::Relaxed),
            inserted: self.metrics.inserted.load(Ordering::Relaxed),
        }
    }
}

/// Owns the background worker task consuming batch jobs
pub struct JobQueue {
    submitter: JobSubmitter,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Spawn the worker against the given sink
    pub fn start(sink: Arc<dyn UsageEventSink>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let metrics = Arc::new(WorkerMetrics::default());
        let worker = tokio::spawn(run_worker(receiver, sink, metrics.clone()));

        info!("Usage worker started");
        Self {
            submitter: JobSubmitter { sender, metrics, closed: Arc::new(AtomicBool::new(false)) },
            worker: Mutex::new(Some(worker)),
        }
    }

    /// A handle the buffer uses to hand over batches
    pub fn submitter(&self) -> JobSubmitter {
        self.submitter.clone()
    }

    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        self.submitter.metrics()
    }

    /// Stop accepting jobs, let the worker drain everything already queued,
    /// and wait for it to exit. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.submitter.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Queued jobs are processed before the shutdown command arrives
        let _ = self.submitter.sender.send(WorkerCommand::Shutdown);

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("Usage worker terminated abnormally: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::MemoryUsageSink;

    fn usage_event(route: &str, user: Option<&str>) -> ApiUsageEvent {
        ApiUsageEvent {
            route: route.to_string(),
            status: 200,
            processing_time_ms: 8,
            error_flag: false,
            timestamp: 1_704_067_200_000,
            version: Some("1.0.0".to_string()),
            user_id: user.map(str::to_string),
            apikey_id: user.map(|u| format!("apikey_{}", u)),
        }
    }

    #[tokio::test]
    async fn test_worker_inserts_submitted_batches() {
        let sink = Arc::new(MemoryUsageSink::default());
        let queue = JobQueue::start(sink.clone());

        let submitter = queue.submitter();
        let batch_id = submitter
            .submit(vec![usage_event("/v1/events", Some("user_1"))])
            .unwrap();
        assert!(batch_id.starts_with("batch_"));

        queue.close().await;

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].route, "/v1/events");
        assert_eq!(rows[0].user_id, "user_1");
        assert!(rows[0].id.starts_with("evt_"));

        let metrics = queue.metrics();
        assert_eq!(metrics.submitted, 1);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.inserted, 1);
    }

    #[tokio::test]
    async fn test_worker_skips_legacy_events() {
        let sink = Arc::new(MemoryUsageSink::default());
        let queue = JobQueue::start(sink.clone());

        queue
            .submitter()
            .submit(vec![
                usage_event("/v1/events", Some("user_1")),
                usage_event("/v1/legacy", None),
            ])
            .unwrap();
        queue.close().await;

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].route, "/v1/events");
        assert_eq!(queue.metrics().skipped_legacy, 1);
    }

    #[tokio::test]
    async fn test_worker_survives_sink_failure() {
        let sink = Arc::new(MemoryUsageSink::default());
        sink.fail_next();
        let queue = JobQueue::start(sink.clone());

        let submitter = queue.submitter();
        submitter.submit(vec![usage_event("/v1/a", Some("user_1"))]).unwrap();
        submitter.submit(vec![usage_event("/v1/b", Some("user_2"))]).unwrap();
        queue.close().await;

        // The first batch failed, the second still made it
        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].route, "/v1/b");

        let metrics = queue.metrics();
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.completed, 1);
    }

    #[tokio::test]
    async fn test_submit_after_close_is_rejected() {
        let sink = Arc::new(MemoryUsageSink::default());
        let queue = JobQueue::start(sink);
        let submitter = queue.submitter();

        queue.close().await;
        queue.close().await; // idempotent

        let err = submitter.submit(vec![usage_event("/v1/late", Some("user_1"))]).unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }
}
