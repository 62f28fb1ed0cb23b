use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use event_buffer::{AnalyticsEvent, AnalyticsSink, EventBuffer, EventBufferConfig};
use queue_store::{MemoryStore, QueueStore};
use realtime_broadcaster::{
    BroadcasterConfig, OnlineUsersProvider, OnlineUsers, RealtimeBroadcaster, RealtimeEvent,
};
use telemetry_queue::{
    ApiUsageEvent, BatchConfig, JobQueue, MemoryUsageSink, UsageEventBuffer,
};

/// Sink double that records every accepted INSERT statement
#[derive(Default)]
struct RecordingSink {
    queries: Mutex<Vec<String>>,
    reject_bulk: std::sync::atomic::AtomicBool,
    reject_ids: Mutex<Vec<String>>,
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn insert(&self, query: &str) -> event_buffer::Result<()> {
        let bulk = query.matches("),(").count() > 0;
        if bulk && self.reject_bulk.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(event_buffer::BufferError::SinkRejected {
                status: 500,
                body: "bulk refused".to_string(),
            });
        }
        if !bulk {
            let reject_ids = self.reject_ids.lock().unwrap();
            if reject_ids.iter().any(|id| query.contains(&format!("('{id}',"))) {
                return Err(event_buffer::BufferError::SinkRejected {
                    status: 400,
                    body: "row refused".to_string(),
                });
            }
        }
        self.queries.lock().unwrap().push(query.to_string());
        Ok(())
    }
}

struct EmptyProvider;

#[async_trait]
impl OnlineUsersProvider for EmptyProvider {
    async fn online_users(&self, _app_id: &str) -> realtime_broadcaster::Result<OnlineUsers> {
        Ok(OnlineUsers::default())
    }
}

fn sdk_event(id: &str) -> AnalyticsEvent {
    AnalyticsEvent {
        event_id: id.to_string(),
        session_id: "session_it".to_string(),
        device_id: "device_it".to_string(),
        app_id: "app_it".to_string(),
        name: "screen_view".to_string(),
        params: None,
        timestamp: "2024-06-01T12:00:00Z".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 Starting Pulse pipeline integration test");

    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());

    // Test 1: push → flush → bulk insert
    println!("📥 Test 1: Event buffer push and flush...");
    let buffer = EventBuffer::new(store.clone(), sink.clone(), EventBufferConfig::default());
    for n in 0..25 {
        buffer.push(&sdk_event(&format!("evt_{n}"))).await?;
    }
    assert_eq!(buffer.buffer_size().await?, 25);
    buffer.flush().await?;
    assert_eq!(buffer.buffer_size().await?, 0);
    assert_eq!(sink.queries.lock().unwrap().len(), 1);
    println!("✅ 25 events flushed as one bulk insert");

    // Test 2: bulk failure falls back to per-record inserts
    println!("🪃 Test 2: Bulk failure fallback...");
    sink.reject_bulk.store(true, std::sync::atomic::Ordering::SeqCst);
    buffer.push(&sdk_event("evt_a")).await?;
    buffer.push(&sdk_event("evt_b")).await?;
    buffer.flush().await?;
    let singles = sink
        .queries
        .lock()
        .unwrap()
        .iter()
        .filter(|q| q.matches("),(").count() == 0)
        .count();
    assert_eq!(singles, 2);
    println!("✅ Fallback wrote both records individually, nothing dead-lettered");

    // Test 2b: a record that fails even in isolation lands on the DLQ
    println!("☠️ Test 2b: Dead-letter routing...");
    sink.reject_ids.lock().unwrap().push("evt_poison".to_string());
    buffer.push(&sdk_event("evt_poison")).await?;
    buffer.push(&sdk_event("evt_healthy")).await?;
    buffer.flush().await?;
    let dlq = store.range("events:dlq", 0, -1).await?;
    assert_eq!(dlq.len(), 1);
    let entry: serde_json::Value = serde_json::from_str(&dlq[0])?;
    assert_eq!(entry["event"]["eventId"], "evt_poison");
    assert!(entry["failedAt"].is_string());
    sink.reject_bulk.store(false, std::sync::atomic::Ordering::SeqCst);
    println!("✅ Poison record dead-lettered, healthy record stored");

    // Test 3: invalid pushes never reach the store
    println!("🛡️ Test 3: Validation gate...");
    let mut invalid = sdk_event("evt_bad");
    invalid.timestamp = "whenever".to_string();
    assert!(buffer.push(&invalid).await.is_err());
    assert_eq!(buffer.buffer_size().await?, 0);
    println!("✅ Invalid event rejected before the store");

    // Test 4: graceful shutdown drains
    println!("🚪 Test 4: Shutdown drain...");
    buffer.push(&sdk_event("evt_last")).await?;
    buffer.flush_and_close().await?;
    assert!(buffer.push(&sdk_event("evt_too_late")).await.is_err());
    assert_eq!(buffer.buffer_size().await?, 0);
    println!("✅ Buffer drained and sealed");

    // Test 5: usage telemetry batching through the worker
    println!("📊 Test 5: Usage telemetry pipeline...");
    let usage_sink = Arc::new(MemoryUsageSink::default());
    let job_queue = JobQueue::start(usage_sink.clone());
    let usage_buffer =
        UsageEventBuffer::new(store.clone(), job_queue.submitter(), BatchConfig::default());
    usage_buffer
        .add_event(&ApiUsageEvent {
            route: "/v1/events".to_string(),
            status: 200,
            processing_time_ms: 7,
            error_flag: false,
            timestamp: 1_717_243_200_000,
            version: Some("1.0.0".to_string()),
            user_id: Some("user_it".to_string()),
            apikey_id: Some("apikey_it".to_string()),
        })
        .await?;
    usage_buffer.close().await?;
    job_queue.close().await;
    assert_eq!(usage_sink.rows().len(), 1);
    println!("✅ Usage event inserted by the background worker");

    // Test 6: realtime fan-out delivers one ordered batch
    println!("📡 Test 6: Realtime fan-out...");
    let broadcaster =
        RealtimeBroadcaster::new(Arc::new(EmptyProvider), BroadcasterConfig::default());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let connection = broadcaster.add_connection("app_it", tx).await;
    for n in 1..=5 {
        broadcaster
            .push_event(
                "app_it",
                RealtimeEvent {
                    event_id: format!("e{n}"),
                    session_id: "session_it".to_string(),
                    device_id: "device_it".to_string(),
                    name: "screen_view".to_string(),
                    params: None,
                    timestamp: "2024-06-01T12:00:00Z".to_string(),
                },
            )
            .await;
    }
    broadcaster.flush_buffers().await;
    let message = rx.try_recv()?;
    let ids: Vec<&str> = message.events.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2", "e3", "e4", "e5"]);
    assert!(rx.try_recv().is_err());
    broadcaster.remove_connection("app_it", connection).await;
    println!("✅ Subscriber received exactly one ordered batch");

    println!("\n🎉 Integration test completed!");
    println!("\n📝 Summary:");
    println!("   - Event buffer: push, flush, fallback, shutdown drain");
    println!("   - Telemetry queue: batch hand-off and worker insert");
    println!("   - Realtime broadcaster: batched ordered fan-out");

    Ok(())
}
