//! Analytics event records accepted by the ingestion buffer

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A flat scalar parameter value. Nested structures are rejected at the
/// serde boundary, so nothing deeper than this ever enters the buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// A validated analytics event (or device ping) from an SDK.
///
/// Owned by the buffer from `push` until it is durably written to the
/// analytical store or moved to the dead-letter list; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub event_id: String,
    pub session_id: String,
    pub device_id: String,
    pub app_id: String,
    pub name: String,
    #[serde(default)]
    pub params: Option<HashMap<String, ParamValue>>,
    /// RFC 3339 timestamp as supplied by the SDK
    pub timestamp: String,
}

impl AnalyticsEvent {
    /// Check the required fields and timestamp parseability.
    /// Returns the reason string on the first violation found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.event_id.is_empty() {
            return Err("Invalid eventId".to_string());
        }
        if self.session_id.is_empty() {
            return Err("Invalid sessionId".to_string());
        }
        if self.device_id.is_empty() {
            return Err("Invalid deviceId".to_string());
        }
        if self.app_id.is_empty() {
            return Err("Invalid appId".to_string());
        }
        if self.name.is_empty() {
            return Err("Invalid name".to_string());
        }
        if self.timestamp_micros().is_none() {
            return Err("Invalid timestamp".to_string());
        }
        Ok(())
    }

    /// The event timestamp as microseconds since the Unix epoch, the native
    /// designated-timestamp type of the analytical store.
    pub fn timestamp_micros(&self) -> Option<i64> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|instant| instant.timestamp_millis() * 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_event() -> AnalyticsEvent {
        AnalyticsEvent {
            event_id: "evt_1".to_string(),
            session_id: "session_1".to_string(),
            device_id: "device_1".to_string(),
            app_id: "app_1".to_string(),
            name: "button_clicked".to_string(),
            params: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_valid_event_passes() {
        assert!(valid_event().validate().is_ok());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut event = valid_event();
        event.event_id = String::new();
        assert_eq!(event.validate(), Err("Invalid eventId".to_string()));

        let mut event = valid_event();
        event.session_id = String::new();
        assert_eq!(event.validate(), Err("Invalid sessionId".to_string()));

        let mut event = valid_event();
        event.app_id = String::new();
        assert_eq!(event.validate(), Err("Invalid appId".to_string()));
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut event = valid_event();
        event.timestamp = "not-a-timestamp".to_string();
        assert_eq!(event.validate(), Err("Invalid timestamp".to_string()));
    }

    #[test]
    fn test_timestamp_micros() {
        let event = valid_event();
        assert_eq!(event.timestamp_micros(), Some(1_704_067_200_000_000));
    }

    #[test]
    fn test_params_accept_flat_scalars_only() {
        let payload = r#"{
            "eventId": "evt_1",
            "sessionId": "session_1",
            "deviceId": "device_1",
            "appId": "app_1",
            "name": "purchase",
            "params": {"price": 9.99, "currency": "USD", "first": true, "coupon": null},
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let event: AnalyticsEvent = serde_json::from_str(payload).unwrap();
        let params = event.params.unwrap();
        assert_eq!(params.get("price"), Some(&ParamValue::Number(9.99)));
        assert_eq!(params.get("coupon"), Some(&ParamValue::Null));

        let nested = r#"{
            "eventId": "evt_1",
            "sessionId": "session_1",
            "deviceId": "device_1",
            "appId": "app_1",
            "name": "purchase",
            "params": {"inner": {"too": "deep"}},
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        assert!(serde_json::from_str::<AnalyticsEvent>(nested).is_err());
    }
}
