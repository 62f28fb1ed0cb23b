//! The event buffer: validated pushes, timer-driven flushes, dead-lettering

use crate::config::EventBufferConfig;
use crate::error::{BufferError, Result};
use crate::record::AnalyticsEvent;
use crate::sink::{build_insert_query, AnalyticsSink};
use chrono::Utc;
use queue_store::QueueStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of a multi-event push
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    /// Number of events accepted into the buffer
    pub success: usize,
    /// Per-event failures, indexed into the submitted slice
    pub failed: Vec<PushFailure>,
}

/// A single rejected event within a multi-event push
#[derive(Debug, Clone, PartialEq)]
pub struct PushFailure {
    pub index: usize,
    pub error: String,
}

/// Entry persisted to the dead-letter list when a record fails insert even
/// in isolation. Never replayed by this component; replay is an operational
/// task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub event: AnalyticsEvent,
    pub error: String,
    /// RFC 3339 instant of the failed insert
    pub failed_at: String,
}

/// Buffers validated events in the queue store and drains them into the
/// analytical sink in bulk.
///
/// Cheap to clone; clones share the underlying state, so request handlers
/// and timer tasks can hold their own handle.
#[derive(Clone)]
pub struct EventBuffer {
    store: Arc<dyn QueueStore>,
    sink: Arc<dyn AnalyticsSink>,
    config: EventBufferConfig,
    /// Single-flight guard: at most one flush pass per process
    flush_lock: Arc<Mutex<()>>,
    shutting_down: Arc<AtomicBool>,
    is_running: Arc<RwLock<bool>>,
    flush_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventBuffer {
    /// Create a new event buffer over the given store and sink
    pub fn new(
        store: Arc<dyn QueueStore>,
        sink: Arc<dyn AnalyticsSink>,
        config: EventBufferConfig,
    ) -> Self {
        Self {
            store,
            sink,
            config,
            flush_lock: Arc::new(Mutex::new(())),
            shutting_down: Arc::new(AtomicBool::new(false)),
            is_running: Arc::new(RwLock::new(false)),
            flush_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Validate one event and push it onto the active buffer list
    pub async fn push(&self, event: &AnalyticsEvent) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BufferError::ShuttingDown);
        }

        if let Err(reason) = event.validate() {
            return Err(BufferError::Validation(reason));
        }

        let payload = serde_json::to_string(event)?;
        self.store.push_front(&self.config.buffer_key, &payload).await?;
        Ok(())
    }

    /// Validate each event independently and push the valid subset in one
    /// pipelined round trip. Validation failures are reported per index; a
    /// transport failure on the pipeline is attributed to every event in it.
    pub async fn push_many(&self, events: &[AnalyticsEvent]) -> Result<PushOutcome> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BufferError::ShuttingDown);
        }

        if events.is_empty() {
            return Ok(PushOutcome { success: 0, failed: Vec::new() });
        }

        let mut failed = Vec::new();
        let mut valid = Vec::new();

        for (index, event) in events.iter().enumerate() {
            match event.validate() {
                Ok(()) => match serde_json::to_string(event) {
                    Ok(payload) => valid.push((index, payload)),
                    Err(err) => failed.push(PushFailure { index, error: err.to_string() }),
                },
                Err(reason) => failed.push(PushFailure { index, error: reason }),
            }
        }

        if valid.is_empty() {
            return Ok(PushOutcome { success: 0, failed });
        }

        let payloads: Vec<String> = valid.iter().map(|(_, payload)| payload.clone()).collect();
        match self.store.push_front_many(&self.config.buffer_key, &payloads).await {
            Ok(pushed) => Ok(PushOutcome { success: pushed, failed }),
            Err(err) => {
                for (index, _) in &valid {
                    failed.push(PushFailure { index: *index, error: err.to_string() });
                }
                Ok(PushOutcome { success: 0, failed })
            }
        }
    }

    /// Arm the periodic flush timer. Starting twice is a no-op.
    pub async fn start(&self) {
        let mut task = self.flush_task.lock().await;
        if task.is_some() {
            return;
        }

        {
            let mut running = self.is_running.write().await;
            *running = true;
        }

        let buffer = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(buffer.config.flush_interval_ms));

            loop {
                interval.tick().await;

                {
                    let running = buffer.is_running.read().await;
                    if !*running {
                        break;
                    }
                }

                if let Err(err) = buffer.flush().await {
                    error!("Flush cycle failed: {}", err);
                }
            }
        }));

        info!("Event buffer started, flushing every {}ms", self.config.flush_interval_ms);
    }

    /// Disarm the flush timer. Stopping twice is a no-op.
    pub async fn stop(&self) {
        {
            let mut running = self.is_running.write().await;
            *running = false;
        }

        let mut task = self.flush_task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }

    /// Drain everything accumulated so far into the sink.
    ///
    /// Single-flight: when a flush is already running, concurrent callers
    /// wait for that pass to finish and return without starting another.
    pub async fn flush(&self) -> Result<()> {
        let _guard = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _in_flight = self.flush_lock.lock().await;
                return Ok(());
            }
        };

        self.do_flush().await
    }

    async fn do_flush(&self) -> Result<()> {
        if !self.store.exists(&self.config.buffer_key).await? {
            return Ok(());
        }

        let swapped = self
            .store
            .rename_if_absent(&self.config.buffer_key, &self.config.flushing_key)
            .await?;
        if !swapped && !self.store.exists(&self.config.flushing_key).await? {
            // Another flusher claimed the buffer and already finished with it.
            return Ok(());
        }

        self.process_batches().await
    }

    /// Drain the flushing list from the tail in fixed-size batches, trimming
    /// each consumed range, until the list is empty.
    async fn process_batches(&self) -> Result<()> {
        let flushing_key = &self.config.flushing_key;

        loop {
            let raw = self.store.range(flushing_key, -(self.config.batch_size as i64), -1).await?;
            if raw.is_empty() {
                self.store.delete(flushing_key).await?;
                break;
            }

            // The tail window arrives newest-first; insert in push order.
            let mut events = Vec::with_capacity(raw.len());
            for entry in raw.iter().rev() {
                match serde_json::from_str::<AnalyticsEvent>(entry) {
                    Ok(event) if event.validate().is_ok() => events.push(event),
                    Ok(event) => {
                        warn!("Discarding buffered event {} that fails validation", event.event_id)
                    }
                    Err(err) => warn!("Discarding malformed buffer entry: {}", err),
                }
            }

            if !events.is_empty() {
                self.write_batch(&events).await;
            }

            self.store.trim(flushing_key, 0, -(raw.len() as i64 + 1)).await?;
        }

        Ok(())
    }

    /// Ship one batch as a bulk INSERT, degrading to per-record inserts on
    /// failure so one bad record cannot hold back the rest.
    async fn write_batch(&self, events: &[AnalyticsEvent]) {
        let query = match build_insert_query(&self.config.table, events) {
            Ok(query) => query,
            Err(err) => {
                error!("Failed to build insert for batch of {}: {}", events.len(), err);
                return;
            }
        };

        if let Err(err) = self.sink.insert(&query).await {
            warn!(
                "Batch insert of {} events failed, falling back to individual writes: {}",
                events.len(),
                err
            );
            self.write_individually(events).await;
        }
    }

    async fn write_individually(&self, events: &[AnalyticsEvent]) {
        for event in events {
            let query = match build_insert_query(&self.config.table, std::slice::from_ref(event)) {
                Ok(query) => query,
                Err(err) => {
                    error!("Failed to build insert for event {}: {}", event.event_id, err);
                    continue;
                }
            };

            if let Err(err) = self.sink.insert(&query).await {
                self.dead_letter(event, &err).await;
            }
        }
    }

    /// Append a failed record to the dead-letter list. Best-effort: a
    /// failure here is logged, never propagated.
    async fn dead_letter(&self, event: &AnalyticsEvent, cause: &BufferError) {
        let entry = DeadLetterEntry {
            event: event.clone(),
            error: cause.to_string(),
            failed_at: Utc::now().to_rfc3339(),
        };

        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Failed to serialize dead-letter entry for {}: {}", event.event_id, err);
                return;
            }
        };

        if let Err(err) = self.store.push_front(&self.config.dead_letter_key, &payload).await {
            error!("Failed to dead-letter event {}: {}", event.event_id, err);
        }
    }

    /// Stop the timer, drain with bounded retries, and refuse further pushes.
    ///
    /// This is the only path that guarantees no silent record loss on
    /// graceful shutdown; an ungraceful exit may lose the not-yet-durable
    /// buffer contents.
    pub async fn flush_and_close(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.stop().await;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.flush().await {
                Ok(()) => return Ok(()),
                Err(err) if attempts >= self.config.close_retries => {
                    error!(
                        "Failed to drain event buffer on shutdown after {} attempts: {}",
                        attempts, err
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!("Shutdown flush attempt {} failed, retrying: {}", attempts, err)
                }
            }
        }
    }

    /// Combined depth of the active and flushing lists. Approximate under
    /// concurrent mutation; not a transactional read.
    pub async fn buffer_size(&self) -> Result<usize> {
        let active = self.store.len(&self.config.buffer_key).await?;
        let flushing = self.store.len(&self.config.flushing_key).await?;
        Ok(active + flushing)
    }
}
