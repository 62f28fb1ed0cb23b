//! Redis-backed queue store
//!
//! Uses a shared `ConnectionManager` so one long-lived connection is safe for
//! concurrent use from many request handlers and timer tasks.

use crate::error::{Result, StoreError};
use crate::store::QueueStore;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::debug;

/// Queue store implementation on Redis
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and build the shared connection manager
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(StoreError::from)?;
        let connection_manager = ConnectionManager::new(client).await.map_err(StoreError::from)?;

        debug!("Connected to queue store at {}", redis_url);
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push_front(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        conn.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn push_front_many(&self, key: &str, values: &[String]) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection_manager.clone();
        let mut pipeline = redis::pipe();
        for value in values {
            pipeline.lpush(key, value).ignore();
        }
        pipeline.query_async::<_, ()>(&mut conn).await?;
        Ok(values.len())
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn.rpop(key, None).await?;
        Ok(value)
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let values: Vec<String> = conn.lrange(key, start as isize, stop as isize).await?;
        Ok(values)
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        conn.ltrim::<_, ()>(key, start as isize, stop as isize).await?;
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let mut conn = self.connection_manager.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn rename_if_absent(&self, src: &str, dst: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let renamed: std::result::Result<bool, redis::RedisError> =
            redis::cmd("RENAMENX").arg(src).arg(dst).query_async(&mut conn).await;

        match renamed {
            Ok(renamed) => Ok(renamed),
            // RENAMENX reports a missing source as an error; callers race
            // against other flushers, so a vanished source means "not ours".
            Err(err) if err.to_string().contains("no such key") => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
