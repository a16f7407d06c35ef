//! Control-channel message shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message kinds carried on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Expects a correlated response.
    Request,
    /// Correlated answer to a request.
    Response,
    /// Fire-and-forget, no correlation.
    Event,
}

/// A single control-channel message.
///
/// `id` is present on requests and on the response that correlates to them;
/// events carry none. `payload` is an arbitrary JSON object whose shape is
/// fixed per selector (`type`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: MessageKind,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Seconds since the unix epoch at send time.
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub payload: Value,
}

impl ControlMessage {
    /// Create a request with the given correlation ID.
    pub fn request(msg_type: &str, id: &str, payload: Value) -> Self {
        Self {
            kind: MessageKind::Request,
            msg_type: msg_type.to_string(),
            id: Some(id.to_string()),
            ts: now(),
            payload,
        }
    }

    /// Create the response correlated to `id`.
    pub fn response(msg_type: &str, id: &str, payload: Value) -> Self {
        Self {
            kind: MessageKind::Response,
            msg_type: msg_type.to_string(),
            id: Some(id.to_string()),
            ts: now(),
            payload,
        }
    }

    /// Create a fire-and-forget event.
    pub fn event(msg_type: &str, payload: Value) -> Self {
        Self {
            kind: MessageKind::Event,
            msg_type: msg_type.to_string(),
            id: None,
            ts: now(),
            payload,
        }
    }
}

/// Allocate a fresh correlation ID (32 hex chars).
pub fn correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_kind_and_type() {
        let msg = ControlMessage::request("ping", "abc123", json!({}));
        let text = serde_json::to_string(&msg).unwrap();

        assert!(text.contains("\"kind\":\"request\""));
        assert!(text.contains("\"type\":\"ping\""));
        assert!(text.contains("\"id\":\"abc123\""));
    }

    #[test]
    fn event_omits_id() {
        let msg = ControlMessage::event("stream_data", json!({"session": "main"}));
        let text = serde_json::to_string(&msg).unwrap();

        assert!(!text.contains("\"id\""));
        assert!(text.contains("\"kind\":\"event\""));
    }

    #[test]
    fn deserializes_without_ts() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"kind":"event","type":"state_update","payload":{}}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Event);
        assert_eq!(msg.msg_type, "state_update");
        assert_eq!(msg.ts, 0.0);
        assert!(msg.id.is_none());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result: Result<ControlMessage, _> =
            serde_json::from_str(r#"{"kind":"gossip","type":"x","payload":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn correlation_ids_are_unique_hex() {
        let a = correlation_id();
        let b = correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
