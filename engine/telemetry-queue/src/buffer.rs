//! Usage-event buffer with size/first-item batch triggering

use crate::config::BatchConfig;
use crate::error::Result;
use crate::event::ApiUsageEvent;
use crate::queue::JobSubmitter;
use queue_store::QueueStore;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Buffers usage events in the queue store and hands full batches to the
/// background worker.
///
/// The very first event after an idle period triggers a batch immediately;
/// while the debounce marker is alive, events just accumulate. A hard cap
/// bounds memory under sustained overload: the oldest entries past the cap
/// are dropped, and that loss is logged, not hidden.
#[derive(Clone)]
pub struct UsageEventBuffer {
    store: Arc<dyn QueueStore>,
    jobs: JobSubmitter,
    config: BatchConfig,
}

impl UsageEventBuffer {
    pub fn new(store: Arc<dyn QueueStore>, jobs: JobSubmitter, config: BatchConfig) -> Self {
        Self { store, jobs, config }
    }

    /// Buffer one event, triggering a batch when thresholds are met
    pub async fn add_event(&self, event: &ApiUsageEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;

        // Inside the debounce window events only accumulate
        if self.store.exists(&self.config.marker_key).await? {
            self.store.push_front(&self.config.events_key, &payload).await?;
            return Ok(());
        }

        self.store.push_front(&self.config.events_key, &payload).await?;

        let depth = self.store.len(&self.config.events_key).await?;
        if depth > self.config.max_buffer_size {
            self.store.trim(&self.config.events_key, 0, self.config.max_buffer_size as i64 - 1).await?;
            warn!(
                "Usage buffer over capacity, dropped {} oldest events",
                depth - self.config.max_buffer_size
            );
        }

        if depth >= self.config.batch_size || depth == 1 {
            self.process_batch().await;
        }

        Ok(())
    }

    /// Form one batch from the buffer and submit it to the worker.
    /// Any failure is logged and the debounce marker cleared so the next
    /// `add_event` can trigger again; the buffer never gets stuck.
    pub async fn process_batch(&self) {
        if let Err(err) = self.try_process_batch().await {
            error!("Usage batch processing failed: {}", err);
            if let Err(cleanup_err) = self.store.delete(&self.config.marker_key).await {
                error!("Failed to clear debounce marker: {}", cleanup_err);
            }
        }
    }

    async fn try_process_batch(&self) -> Result<()> {
        let mut entries = Vec::with_capacity(self.config.batch_size);
        for _ in 0..self.config.batch_size {
            match self.store.pop_back(&self.config.events_key).await? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }

        if entries.is_empty() {
            return Ok(());
        }

        let events: Vec<ApiUsageEvent> =
            entries.iter().filter_map(|entry| ApiUsageEvent::parse(entry)).collect();

        if events.is_empty() {
            warn!("No valid events in usage batch of {}", entries.len());
            return Ok(());
        }

        let batch_id = self.jobs.submit(events)?;
        debug!("Submitted usage batch {}", batch_id);

        self.store
            .set_with_expiry(&self.config.marker_key, "1", self.config.debounce_secs)
            .await?;
        Ok(())
    }

    /// Force one batch regardless of thresholds. Used at shutdown.
    pub async fn flush(&self) {
        self.process_batch().await;
    }

    /// Drain everything buffered, then clear the debounce marker.
    pub async fn close(&self) -> Result<()> {
        loop {
            if self.buffer_size().await? == 0 {
                break;
            }
            let before = self.buffer_size().await?;
            self.process_batch().await;
            // A failing store would loop forever otherwise
            if self.buffer_size().await? >= before {
                warn!("Usage buffer not draining, abandoning {} events", before);
                break;
            }
        }

        self.store.delete(&self.config.marker_key).await?;
        Ok(())
    }

    /// Current buffered depth
    pub async fn buffer_size(&self) -> Result<usize> {
        Ok(self.store.len(&self.config.events_key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use crate::worker::MemoryUsageSink;
    use queue_store::MemoryStore;

    fn usage_event(route: &str) -> ApiUsageEvent {
        ApiUsageEvent {
            route: route.to_string(),
            status: 200,
            processing_time_ms: 5,
            error_flag: false,
            timestamp: 1_704_067_200_000,
            version: None,
            user_id: Some("user_1".to_string()),
            apikey_id: Some("apikey_1".to_string()),
        }
    }

    fn setup(config: BatchConfig) -> (Arc<MemoryStore>, Arc<MemoryUsageSink>, JobQueue, UsageEventBuffer) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemoryUsageSink::default());
        let queue = JobQueue::start(sink.clone());
        let buffer = UsageEventBuffer::new(store.clone(), queue.submitter(), config);
        (store, sink, queue, buffer)
    }

    #[tokio::test]
    async fn test_first_event_triggers_immediately() {
        let (_, sink, queue, buffer) = setup(BatchConfig::default());

        buffer.add_event(&usage_event("/v1/events")).await.unwrap();
        queue.close().await;

        assert_eq!(sink.rows().len(), 1);
        assert_eq!(buffer.buffer_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_debounce_marker_suppresses_triggering() {
        let (store, sink, queue, buffer) = setup(BatchConfig::default());

        // First event forms a batch and arms the marker
        buffer.add_event(&usage_event("/v1/a")).await.unwrap();
        assert!(store.exists("api_events:debounce").await.unwrap());

        // Subsequent events accumulate without triggering
        buffer.add_event(&usage_event("/v1/b")).await.unwrap();
        buffer.add_event(&usage_event("/v1/c")).await.unwrap();
        assert_eq!(buffer.buffer_size().await.unwrap(), 2);

        queue.close().await;
        assert_eq!(sink.rows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_expiry_reenables_triggering() {
        let (_, sink, queue, buffer) = setup(BatchConfig::default());

        buffer.add_event(&usage_event("/v1/a")).await.unwrap();
        tokio::time::advance(std::time::Duration::from_secs(6)).await;

        // Marker expired; the buffer is empty again so depth == 1 triggers
        buffer.add_event(&usage_event("/v1/b")).await.unwrap();
        queue.close().await;

        assert_eq!(sink.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_batch() {
        let config = BatchConfig { batch_size: 3, debounce_secs: 600, ..BatchConfig::default() };
        let (store, sink, queue, buffer) = setup(config);

        // Pre-fill past the threshold while a marker suppresses triggering,
        // then remove it so the next event sees depth >= batch_size
        store.set_with_expiry("api_events:debounce", "1", 600).await.unwrap();
        buffer.add_event(&usage_event("/v1/a")).await.unwrap();
        buffer.add_event(&usage_event("/v1/b")).await.unwrap();
        store.delete("api_events:debounce").await.unwrap();

        buffer.add_event(&usage_event("/v1/c")).await.unwrap();
        queue.close().await;

        let rows = sink.rows();
        assert_eq!(rows.len(), 3);
        // Oldest first: pop_back drains in arrival order
        assert_eq!(rows[0].route, "/v1/a");
        assert_eq!(rows[2].route, "/v1/c");
    }

    #[tokio::test]
    async fn test_cap_drops_oldest_entries() {
        let config = BatchConfig {
            batch_size: 100,
            max_buffer_size: 3,
            debounce_secs: 600,
            ..BatchConfig::default()
        };
        let (store, _, _queue, buffer) = setup(config);

        // Suppress triggering so everything accumulates
        store.set_with_expiry("api_events:debounce", "1", 600).await.unwrap();
        for route in ["/v1/a", "/v1/b", "/v1/c", "/v1/d"] {
            buffer.add_event(&usage_event(route)).await.unwrap();
        }
        store.delete("api_events:debounce").await.unwrap();

        // Cap enforcement happens outside the debounce window
        buffer.add_event(&usage_event("/v1/e")).await.unwrap();

        let entries = store.range("api_events:buffer", 0, -1).await.unwrap();
        let routes: Vec<String> = entries
            .iter()
            .map(|raw| ApiUsageEvent::parse(raw).unwrap().route)
            .collect();
        // Newest first in list order; the oldest entries were dropped
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0], "/v1/e");
        assert!(!routes.contains(&"/v1/a".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_entries_skipped_without_failing_batch() {
        let (store, sink, queue, buffer) = setup(BatchConfig::default());

        store.push_front("api_events:buffer", "not json").await.unwrap();
        buffer.add_event(&usage_event("/v1/good")).await.unwrap();
        buffer.flush().await;
        queue.close().await;

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].route, "/v1/good");
    }

    #[tokio::test]
    async fn test_close_drains_backlog() {
        let config = BatchConfig { batch_size: 2, debounce_secs: 600, ..BatchConfig::default() };
        let (store, sink, queue, buffer) = setup(config);

        store.set_with_expiry("api_events:debounce", "1", 600).await.unwrap();
        for n in 0..5 {
            buffer.add_event(&usage_event(&format!("/v1/{}", n))).await.unwrap();
        }

        buffer.close().await.unwrap();
        queue.close().await;

        assert_eq!(sink.rows().len(), 5);
        assert_eq!(buffer.buffer_size().await.unwrap(), 0);
        assert!(!store.exists("api_events:debounce").await.unwrap());
    }
}
