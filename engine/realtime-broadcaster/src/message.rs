//! Wire shapes broadcast to live dashboard viewers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A live event as shown in the activity feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub event_id: String,
    pub session_id: String,
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub timestamp: String,
}

/// A session that just started or saw activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSession {
    pub session_id: String,
    pub device_id: String,
    pub started_at: String,
    pub last_activity_at: String,
}

/// A device that just appeared
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeDevice {
    pub device_id: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub first_seen: String,
}

/// Aggregate "who is online now" view for one app
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsers {
    pub total: usize,
    pub devices: Vec<String>,
    pub platforms: HashMap<String, u32>,
    pub countries: HashMap<String, u32>,
}

/// One batched message per app per flush interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMessage {
    pub timestamp: String,
    pub events: Vec<RealtimeEvent>,
    pub sessions: Vec<RealtimeSession>,
    pub devices: Vec<RealtimeDevice>,
    pub online_users: OnlineUsers,
}
