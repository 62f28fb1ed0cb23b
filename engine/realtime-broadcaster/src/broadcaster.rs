//! The realtime broadcast manager

use crate::config::BroadcasterConfig;
use crate::message::{
    OnlineUsers, RealtimeDevice, RealtimeEvent, RealtimeMessage, RealtimeSession,
};
use crate::online::OnlineUsersProvider;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifies one live subscriber connection
pub type ConnectionId = Uuid;

/// Per-app buffered activity awaiting the next broadcast
#[derive(Default)]
struct AppBuffer {
    events: Vec<RealtimeEvent>,
    sessions: Vec<RealtimeSession>,
    devices: Vec<RealtimeDevice>,
}

struct CachedOnlineUsers {
    data: OnlineUsers,
    stored_at: Instant,
}

/// Aggregate counters for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterStats {
    pub total_apps: usize,
    pub total_connections: usize,
    pub buffered_events: usize,
    pub buffered_sessions: usize,
    pub buffered_devices: usize,
}

/// Fan-out manager for live dashboard viewers.
///
/// State exists per app only while that app has at least one live
/// connection; the last disconnect discards its buffers and cache so nothing
/// leaks across reconnect cycles. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RealtimeBroadcaster {
    connections:
        Arc<RwLock<HashMap<String, HashMap<ConnectionId, mpsc::UnboundedSender<RealtimeMessage>>>>>,
    buffers: Arc<RwLock<HashMap<String, AppBuffer>>>,
    online_cache: Arc<RwLock<HashMap<String, CachedOnlineUsers>>>,
    provider: Arc<dyn OnlineUsersProvider>,
    config: BroadcasterConfig,
    is_running: Arc<RwLock<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RealtimeBroadcaster {
    pub fn new(provider: Arc<dyn OnlineUsersProvider>, config: BroadcasterConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            buffers: Arc::new(RwLock::new(HashMap::new())),
            online_cache: Arc::new(RwLock::new(HashMap::new())),
            provider,
            config,
            is_running: Arc::new(RwLock::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a subscriber for an app. The first connection lazily
    /// initializes the app's buffers. The caller keeps the returned id and
    /// passes it to [`remove_connection`](Self::remove_connection) on
    /// disconnect.
    pub async fn add_connection(
        &self,
        app_id: &str,
        sender: mpsc::UnboundedSender<RealtimeMessage>,
    ) -> ConnectionId {
        let id = Uuid::new_v4();

        {
            let mut connections = self.connections.write().await;
            connections.entry(app_id.to_string()).or_default().insert(id, sender);
        }
        {
            let mut buffers = self.buffers.write().await;
            buffers.entry(app_id.to_string()).or_default();
        }

        debug!("Added realtime connection {} for app {}", id, app_id);
        id
    }

    /// Unregister a subscriber. When the last one for an app goes away, all
    /// buffered and cached state for that app is discarded.
    pub async fn remove_connection(&self, app_id: &str, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        let Some(subscribers) = connections.get_mut(app_id) else {
            return;
        };

        subscribers.remove(&id);
        if subscribers.is_empty() {
            connections.remove(app_id);
            self.buffers.write().await.remove(app_id);
            self.online_cache.write().await.remove(app_id);
            debug!("Last connection for app {} closed, state discarded", app_id);
        }
    }

    /// Buffer a live event for an app. No-op unless someone is watching.
    pub async fn push_event(&self, app_id: &str, event: RealtimeEvent) {
        let mut buffers = self.buffers.write().await;
        let Some(buffer) = buffers.get_mut(app_id) else {
            return;
        };

        buffer.events.push(event);
        let max = self.config.max_buffer_size;
        if buffer.events.len() > max {
            let excess = buffer.events.len() - max;
            buffer.events.drain(..excess);
        }
    }

    /// Buffer a live session for an app. No-op unless someone is watching.
    pub async fn push_session(&self, app_id: &str, session: RealtimeSession) {
        let mut buffers = self.buffers.write().await;
        let Some(buffer) = buffers.get_mut(app_id) else {
            return;
        };

        buffer.sessions.push(session);
        let max = self.config.max_buffer_size;
        if buffer.sessions.len() > max {
            let excess = buffer.sessions.len() - max;
            buffer.sessions.drain(..excess);
        }
    }

    /// Buffer a live device for an app. No-op unless someone is watching.
    pub async fn push_device(&self, app_id: &str, device: RealtimeDevice) {
        let mut buffers = self.buffers.write().await;
        let Some(buffer) = buffers.get_mut(app_id) else {
            return;
        };

        buffer.devices.push(device);
        let max = self.config.max_buffer_size;
        if buffer.devices.len() > max {
            let excess = buffer.devices.len() - max;
            buffer.devices.drain(..excess);
        }
    }

    /// Cache the online-users aggregate for an app
    pub async fn set_online_users(&self, app_id: &str, data: OnlineUsers) {
        let mut cache = self.online_cache.write().await;
        cache.insert(app_id.to_string(), CachedOnlineUsers { data, stored_at: Instant::now() });
    }

    /// Read the cached aggregate. A stale entry is evicted and the zeroed
    /// fallback returned instead of old data.
    pub async fn get_online_users(&self, app_id: &str) -> OnlineUsers {
        let ttl = Duration::from_millis(self.config.online_cache_ttl_ms);
        let mut cache = self.online_cache.write().await;

        match cache.get(app_id) {
            Some(entry) if entry.stored_at.elapsed() > ttl => {
                cache.remove(app_id);
                OnlineUsers::default()
            }
            Some(entry) => entry.data.clone(),
            None => OnlineUsers::default(),
        }
    }

    /// Drain every watched app's buffers into one batched message each and
    /// send it to all of that app's subscribers. Buffers are cleared after
    /// dispatch even when individual sends fail; a failing subscriber is
    /// treated as dead and unregistered.
    pub async fn flush_buffers(&self) {
        let app_ids: Vec<String> = {
            let buffers = self.buffers.read().await;
            buffers.keys().cloned().collect()
        };

        for app_id in app_ids {
            let watched = {
                let connections = self.connections.read().await;
                connections.get(&app_id).is_some_and(|subs| !subs.is_empty())
            };
            if !watched {
                continue;
            }

            let (events, sessions, devices) = {
                let mut buffers = self.buffers.write().await;
                match buffers.get_mut(&app_id) {
                    Some(buffer) => (
                        std::mem::take(&mut buffer.events),
                        std::mem::take(&mut buffer.sessions),
                        std::mem::take(&mut buffer.devices),
                    ),
                    None => continue,
                }
            };

            let message = RealtimeMessage {
                timestamp: Utc::now().to_rfc3339(),
                events,
                sessions,
                devices,
                online_users: self.get_online_users(&app_id).await,
            };

            self.broadcast(&app_id, message).await;
        }
    }

    async fn broadcast(&self, app_id: &str, message: RealtimeMessage) {
        let dead: Vec<ConnectionId> = {
            let connections = self.connections.read().await;
            let Some(subscribers) = connections.get(app_id) else {
                return;
            };
            subscribers
                .iter()
                .filter(|(_, sender)| sender.send(message.clone()).is_err())
                .map(|(id, _)| *id)
                .collect()
        };

        for id in dead {
            warn!("Removing dead realtime connection {} for app {}", id, app_id);
            self.remove_connection(app_id, id).await;
        }
    }

    /// Recompute the online-users aggregate for every watched app.
    /// Per-app failures are logged and skipped.
    pub async fn refresh_online_users(&self) {
        let app_ids: Vec<String> = {
            let connections = self.connections.read().await;
            connections.keys().cloned().collect()
        };

        for app_id in app_ids {
            match self.provider.online_users(&app_id).await {
                Ok(data) => self.set_online_users(&app_id, data).await,
                Err(err) => {
                    error!("Failed to refresh online users for app {}: {}", app_id, err)
                }
            }
        }
    }

    /// Arm the broadcast and online-users refresh timers. Starting twice is
    /// a no-op.
    pub async fn start(&self) {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return;
            }
            *running = true;
        }

        let mut tasks = self.tasks.lock().await;

        let broadcaster = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(broadcaster.config.flush_interval_ms));
            loop {
                interval.tick().await;
                {
                    let running = broadcaster.is_running.read().await;
                    if !*running {
                        break;
                    }
                }
                broadcaster.flush_buffers().await;
            }
        }));

        let broadcaster = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(broadcaster.config.online_refresh_ms));
            loop {
                interval.tick().await;
                {
                    let running = broadcaster.is_running.read().await;
                    if !*running {
                        break;
                    }
                }
                broadcaster.refresh_online_users().await;
            }
        }));

        info!(
            "Realtime broadcaster started (flush every {}ms, refresh every {}ms)",
            self.config.flush_interval_ms, self.config.online_refresh_ms
        );
    }

    /// Disarm both timers and drop all in-memory state. Full teardown, used
    /// at process shutdown only.
    pub async fn stop(&self) {
        {
            let mut running = self.is_running.write().await;
            *running = false;
        }

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        self.connections.write().await.clear();
        self.buffers.write().await.clear();
        self.online_cache.write().await.clear();
        info!("Realtime broadcaster stopped");
    }

    /// Aggregate counters; computed without mutating any state
    pub async fn get_stats(&self) -> BroadcasterStats {
        let connections = self.connections.read().await;
        let buffers = self.buffers.read().await;

        BroadcasterStats {
            total_apps: connections.len(),
            total_connections: connections.values().map(|subs| subs.len()).sum(),
            buffered_events: buffers.values().map(|b| b.events.len()).sum(),
            buffered_sessions: buffers.values().map(|b| b.sessions.len()).sum(),
            buffered_devices: buffers.values().map(|b| b.devices.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::online::OnlineUsersProvider;
    use async_trait::async_trait;

    /// Provider double returning a fixed aggregate
    struct StaticProvider {
        total: usize,
    }

    #[async_trait]
    impl OnlineUsersProvider for StaticProvider {
        async fn online_users(&self, _app_id: &str) -> Result<OnlineUsers> {
            Ok(OnlineUsers {
                total: self.total,
                devices: (0..self.total).map(|n| format!("device_{}", n)).collect(),
                platforms: HashMap::new(),
                countries: HashMap::new(),
            })
        }
    }

    fn broadcaster(config: BroadcasterConfig) -> RealtimeBroadcaster {
        RealtimeBroadcaster::new(Arc::new(StaticProvider { total: 2 }), config)
    }

    fn live_event(id: &str) -> RealtimeEvent {
        RealtimeEvent {
            event_id: id.to_string(),
            session_id: "session_1".to_string(),
            device_id: "device_1".to_string(),
            name: "screen_view".to_string(),
            params: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_one_ordered_batch() {
        let manager = broadcaster(BroadcasterConfig::default());
        let (sender, mut receiver) = mpsc::unbounded_channel();
        manager.add_connection("app_1", sender).await;

        for id in ["e1", "e2", "e3", "e4", "e5"] {
            manager.push_event("app_1", live_event(id)).await;
        }

        manager.flush_buffers().await;

        let message = receiver.try_recv().unwrap();
        let ids: Vec<&str> = message.events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3", "e4", "e5"]);
        assert!(receiver.try_recv().is_err(), "expected exactly one message");

        // Buffer is empty immediately after the flush
        let stats = manager.get_stats().await;
        assert_eq!(stats.buffered_events, 0);
    }

    #[tokio::test]
    async fn test_no_buffering_without_subscribers() {
        let manager = broadcaster(BroadcasterConfig::default());

        manager.push_event("app_unwatched", live_event("e1")).await;

        let stats = manager.get_stats().await;
        assert_eq!(stats.buffered_events, 0);
        assert_eq!(stats.total_apps, 0);
    }

    #[tokio::test]
    async fn test_ring_buffer_keeps_most_recent() {
        let config = BroadcasterConfig { max_buffer_size: 3, ..BroadcasterConfig::default() };
        let manager = broadcaster(config);
        let (sender, mut receiver) = mpsc::unbounded_channel();
        manager.add_connection("app_1", sender).await;

        for n in 1..=5 {
            manager.push_event("app_1", live_event(&format!("e{}", n))).await;
        }

        manager.flush_buffers().await;
        let message = receiver.try_recv().unwrap();
        let ids: Vec<&str> = message.events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e4", "e5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_online_cache_returns_zeroed_fallback() {
        let manager = broadcaster(BroadcasterConfig::default());
        let (sender, _receiver) = mpsc::unbounded_channel();
        manager.add_connection("app_1", sender).await;

        let data = OnlineUsers {
            total: 4,
            devices: vec!["d1".to_string()],
            platforms: HashMap::new(),
            countries: HashMap::new(),
        };
        manager.set_online_users("app_1", data.clone()).await;
        assert_eq!(manager.get_online_users("app_1").await, data);

        tokio::time::advance(Duration::from_millis(61_000)).await;
        assert_eq!(manager.get_online_users("app_1").await, OnlineUsers::default());

        // The stale entry was evicted, not kept around
        assert_eq!(manager.get_online_users("app_1").await, OnlineUsers::default());
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_unregistered() {
        let manager = broadcaster(BroadcasterConfig::default());
        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();

        manager.add_connection("app_1", alive_tx).await;
        manager.add_connection("app_1", dead_tx).await;
        drop(dead_rx);

        manager.push_event("app_1", live_event("e1")).await;
        manager.flush_buffers().await;

        assert!(alive_rx.try_recv().is_ok());
        let stats = manager.get_stats().await;
        assert_eq!(stats.total_connections, 1);
    }

    #[tokio::test]
    async fn test_last_disconnect_discards_app_state() {
        let manager = broadcaster(BroadcasterConfig::default());
        let (sender, _receiver) = mpsc::unbounded_channel();
        let id = manager.add_connection("app_1", sender).await;

        manager.push_event("app_1", live_event("e1")).await;
        manager.set_online_users("app_1", OnlineUsers::default()).await;

        manager.remove_connection("app_1", id).await;

        let stats = manager.get_stats().await;
        assert_eq!(stats.total_apps, 0);
        assert_eq!(stats.buffered_events, 0);

        // Pushes for the departed app are no-ops again
        manager.push_event("app_1", live_event("e2")).await;
        assert_eq!(manager.get_stats().await.buffered_events, 0);
    }

    #[tokio::test]
    async fn test_refresh_populates_cache_for_watched_apps() {
        let manager = broadcaster(BroadcasterConfig::default());
        let (sender, _receiver) = mpsc::unbounded_channel();
        manager.add_connection("app_1", sender).await;

        manager.refresh_online_users().await;

        let online = manager.get_online_users("app_1").await;
        assert_eq!(online.total, 2);
        assert_eq!(online.devices.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_driven_broadcast() {
        let manager = broadcaster(BroadcasterConfig::default());
        let (sender, mut receiver) = mpsc::unbounded_channel();
        manager.add_connection("app_1", sender).await;

        manager.start().await;
        manager.start().await; // idempotent

        manager.push_event("app_1", live_event("e1")).await;
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // Every interval produces a batch; one of them carries the event
        let mut delivered = false;
        while let Ok(message) = receiver.try_recv() {
            if message.events.iter().any(|event| event.event_id == "e1") {
                delivered = true;
            }
        }
        assert!(delivered);

        manager.stop().await;
        assert_eq!(manager.get_stats().await.total_apps, 0);
    }
}
