//! Analytical sink client and INSERT statement building

use crate::config::SinkConfig;
use crate::error::{BufferError, Result};
use crate::record::AnalyticsEvent;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Bulk INSERT target for drained event batches
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Execute one INSERT statement. Any non-success outcome is an error;
    /// the caller decides whether to retry per record.
    async fn insert(&self, query: &str) -> Result<()>;
}

/// Sink implementation against a QuestDB-style HTTP exec endpoint.
///
/// Statements are submitted as the `query` parameter of a GET request; a
/// 2xx status is success, anything else is reported with the body verbatim.
pub struct QuestDbSink {
    client: reqwest::Client,
    config: SinkConfig,
}

impl QuestDbSink {
    pub fn new(config: SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| BufferError::SinkUnreachable(err.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl AnalyticsSink for QuestDbSink {
    async fn insert(&self, query: &str) -> Result<()> {
        let url =
            format!("{}/exec?query={}", self.config.base_url, urlencoding::encode(query));

        let response = self.client.get(&url).send().await.map_err(|err| {
            if err.is_timeout() {
                BufferError::SinkTimeout(self.config.timeout_ms)
            } else {
                BufferError::SinkUnreachable(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BufferError::SinkRejected { status: status.as_u16(), body });
        }

        debug!("Sink accepted query of {} bytes", query.len());
        Ok(())
    }
}

/// Escape a string literal for embedding in an INSERT statement:
/// backslashes are doubled, single quotes doubled.
pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

/// Build one bulk INSERT statement for a batch of events.
///
/// Timestamps are written as microseconds since the epoch; every
/// string-typed column goes through [`escape_sql_string`], including the
/// JSON-serialized params.
pub(crate) fn build_insert_query(table: &str, events: &[AnalyticsEvent]) -> Result<String> {
    let mut rows = Vec::with_capacity(events.len());

    for event in events {
        let params = match &event.params {
            Some(params) => format!("'{}'", escape_sql_string(&serde_json::to_string(params)?)),
            None => "null".to_string(),
        };
        let timestamp_micros = event.timestamp_micros().unwrap_or(0);

        rows.push(format!(
            "('{}','{}','{}','{}','{}',{},{})",
            escape_sql_string(&event.event_id),
            escape_sql_string(&event.session_id),
            escape_sql_string(&event.device_id),
            escape_sql_string(&event.app_id),
            escape_sql_string(&event.name),
            params,
            timestamp_micros
        ));
    }

    Ok(format!(
        "INSERT INTO {} (event_id, session_id, device_id, app_id, name, params, timestamp) VALUES {}",
        table,
        rows.join(",")
    ))
}
