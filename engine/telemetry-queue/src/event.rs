//! API-usage telemetry events

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Epoch milliseconds below this are almost certainly seconds; reject them.
const MIN_TIMESTAMP_MS: i64 = 1_000_000_000_000;

/// One recorded API call.
///
/// `user_id` and `apikey_id` are optional for backward compatibility with
/// older writers; when present they must be strings, and the worker skips
/// entries that lack them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsageEvent {
    pub route: String,
    pub status: u16,
    pub processing_time_ms: u64,
    pub error_flag: bool,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apikey_id: Option<String>,
}

impl ApiUsageEvent {
    /// Leniently parse a buffered entry. Anything malformed is logged and
    /// dropped; one bad entry never fails a batch.
    pub fn parse(payload: &str) -> Option<Self> {
        let event: Self = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!("Dropping unparseable usage event {:.100}: {}", payload, err);
                return None;
            }
        };

        if event.timestamp <= MIN_TIMESTAMP_MS {
            warn!(
                "Dropping usage event for {} with timestamp {} (expected milliseconds)",
                event.route, event.timestamp
            );
            return None;
        }

        Some(event)
    }

    /// Whether this event carries the attribution fields newer writers set
    pub fn has_attribution(&self) -> bool {
        self.user_id.is_some() && self.apikey_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_event() {
        let payload = r#"{
            "route": "/v1/events",
            "status": 200,
            "processingTimeMs": 12,
            "errorFlag": false,
            "timestamp": 1704067200000,
            "version": "1.4.0",
            "userId": "user_1",
            "apikeyId": "apikey_1"
        }"#;
        let event = ApiUsageEvent::parse(payload).unwrap();
        assert_eq!(event.route, "/v1/events");
        assert!(event.has_attribution());
    }

    #[test]
    fn test_parse_legacy_event_without_attribution() {
        let payload = r#"{
            "route": "/v1/ping",
            "status": 204,
            "processingTimeMs": 3,
            "errorFlag": false,
            "timestamp": 1704067200000
        }"#;
        let event = ApiUsageEvent::parse(payload).unwrap();
        assert!(!event.has_attribution());
        assert_eq!(event.version, None);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        // status must be a number
        let payload = r#"{
            "route": "/v1/events",
            "status": "200",
            "processingTimeMs": 12,
            "errorFlag": false,
            "timestamp": 1704067200000
        }"#;
        assert!(ApiUsageEvent::parse(payload).is_none());

        // userId present but not a string
        let payload = r#"{
            "route": "/v1/events",
            "status": 200,
            "processingTimeMs": 12,
            "errorFlag": false,
            "timestamp": 1704067200000,
            "userId": 42
        }"#;
        assert!(ApiUsageEvent::parse(payload).is_none());
    }

    #[test]
    fn test_parse_rejects_second_timestamps() {
        let payload = r#"{
            "route": "/v1/events",
            "status": 200,
            "processingTimeMs": 12,
            "errorFlag": false,
            "timestamp": 1704067200
        }"#;
        assert!(ApiUsageEvent::parse(payload).is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ApiUsageEvent::parse("not json").is_none());
    }
}
