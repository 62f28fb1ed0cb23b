//! # Realtime Broadcaster
//!
//! Live activity fan-out for dashboard viewers. Ingested events, sessions,
//! and devices are buffered per app and flushed to every live subscriber as
//! one batched message per interval, so the number of messages each viewer
//! receives is bounded regardless of event volume. A slower timer refreshes
//! a cached "who is online now" aggregate per app.
//!
//! ## Architecture
//!
//! - **RealtimeBroadcaster**: subscriber registry, ring-bounded buffers,
//!   online-users cache, and the two interval timers
//! - **OnlineUsersProvider**: abstract aggregate query;
//!   **PostgresOnlineUsersProvider** is the production implementation
//! - message types mirror what the SSE route layer serializes to viewers

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod message;
pub mod online;

pub use broadcaster::{BroadcasterStats, ConnectionId, RealtimeBroadcaster};
pub use config::BroadcasterConfig;
pub use error::{BroadcastError, Result};
pub use message::{
    OnlineUsers, RealtimeDevice, RealtimeEvent, RealtimeMessage, RealtimeSession,
};
pub use online::{OnlineUsersProvider, PostgresOnlineUsersProvider};
