//! Online-users aggregate provider

use crate::error::Result;
use crate::message::OnlineUsers;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};

/// Computes the "who is online now" aggregate for one app
#[async_trait]
pub trait OnlineUsersProvider: Send + Sync {
    async fn online_users(&self, app_id: &str) -> Result<OnlineUsers>;
}

/// Production provider: devices whose sessions saw activity within the
/// threshold, with platform and country breakdowns.
pub struct PostgresOnlineUsersProvider {
    pool: PgPool,
    active_threshold_secs: i64,
}

impl PostgresOnlineUsersProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, active_threshold_secs: 60 }
    }

    pub fn with_threshold(pool: PgPool, active_threshold_secs: i64) -> Self {
        Self { pool, active_threshold_secs }
    }
}

#[async_trait]
impl OnlineUsersProvider for PostgresOnlineUsersProvider {
    async fn online_users(&self, app_id: &str) -> Result<OnlineUsers> {
        let threshold = Utc::now() - Duration::seconds(self.active_threshold_secs);

        let rows = sqlx::query(
            "SELECT d.device_id, d.platform, d.country \
             FROM sessions s \
             INNER JOIN devices d ON s.device_id = d.device_id \
             WHERE d.app_id = $1 AND s.last_activity_at >= $2",
        )
        .bind(app_id)
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        let mut devices = Vec::new();
        let mut seen = HashSet::new();
        let mut platforms: HashMap<String, u32> = HashMap::new();
        let mut countries: HashMap<String, u32> = HashMap::new();

        for row in &rows {
            let device_id: String = row.get("device_id");
            if seen.insert(device_id.clone()) {
                devices.push(device_id);
            }

            if let Some(platform) = row.get::<Option<String>, _>("platform") {
                *platforms.entry(platform).or_insert(0) += 1;
            }
            if let Some(country) = row.get::<Option<String>, _>("country") {
                *countries.entry(country).or_insert(0) += 1;
            }
        }

        Ok(OnlineUsers { total: devices.len(), devices, platforms, countries })
    }
}
