/// Channel message schema - wire envelope and typed payloads
///
/// Every frame on the realtime channel is a UTF-8 JSON text frame decoding to
/// the envelope `{ type, payload, timestamp }`. The payload is opaque to the
/// channel itself; consumers decode it into one of the known typed shapes or
/// fall back to the raw value for tags they do not recognize.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Reserved subscription key that matches every message type.
///
/// Only valid as a subscription key; outbound messages with this type are
/// dropped by the manager.
pub const WILDCARD: &str = "*";

// ============================================================================
// MESSAGE ENVELOPE
// ============================================================================

/// Standard channel message envelope
///
/// Immutable once received; the channel never mutates or re-queues a message
/// after delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message type tag (consumer-defined namespace, e.g. "metric.update")
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload; interpretation is the consumer's responsibility
    pub payload: Value,

    /// Producer-supplied instant (unix milliseconds), not validated here
    pub timestamp: i64,
}

impl ChannelMessage {
    /// Build a new outbound message stamped with the current time
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Parse an inbound text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize for transmission
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode the payload into a known typed shape
    ///
    /// Unknown tags, and known tags whose payload does not match the expected
    /// shape, fall back to `MessagePayload::Unknown` with the raw value so
    /// consumers can pattern-match instead of casting.
    pub fn decode(&self) -> MessagePayload {
        match MessageKind::from_code(&self.kind) {
            Some(MessageKind::MetricUpdate) => serde_json::from_value(self.payload.clone())
                .map(MessagePayload::MetricUpdate)
                .unwrap_or_else(|_| MessagePayload::Unknown(self.payload.clone())),
            Some(MessageKind::AlertRaised) => serde_json::from_value(self.payload.clone())
                .map(MessagePayload::AlertRaised)
                .unwrap_or_else(|_| MessagePayload::Unknown(self.payload.clone())),
            Some(MessageKind::SystemStatus) => serde_json::from_value(self.payload.clone())
                .map(MessagePayload::SystemStatus)
                .unwrap_or_else(|_| MessagePayload::Unknown(self.payload.clone())),
            None => MessagePayload::Unknown(self.payload.clone()),
        }
    }
}

// ============================================================================
// KNOWN MESSAGE KINDS
// ============================================================================

/// Message kinds with a known payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    MetricUpdate,
    AlertRaised,
    SystemStatus,
}

impl MessageKind {
    /// Get the type tag string (used in the envelope)
    pub fn code(&self) -> &'static str {
        match self {
            MessageKind::MetricUpdate => "metric.update",
            MessageKind::AlertRaised => "alert.raised",
            MessageKind::SystemStatus => "system.status",
        }
    }

    /// Parse a kind from its type tag
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "metric.update" => Some(MessageKind::MetricUpdate),
            "alert.raised" => Some(MessageKind::AlertRaised),
            "system.status" => Some(MessageKind::SystemStatus),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// TYPED PAYLOADS
// ============================================================================

/// Decoded payload variants
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    MetricUpdate(MetricUpdate),
    AlertRaised(AlertRaised),
    SystemStatus(SystemStatus),
    /// Unknown tag or mismatched shape; raw payload preserved
    Unknown(Value),
}

/// Payload for "metric.update"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    pub value: f64,
    #[serde(default)]
    pub metric: Option<String>,
}

/// Payload for "alert.raised"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRaised {
    pub severity: String,
    pub message: String,
}

/// Payload for "system.status"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    #[serde(default)]
    pub uptime_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let message = ChannelMessage {
            kind: "metric.update".to_string(),
            payload: json!({"value": 42}),
            timestamp: 1_700_000_000_000,
        };

        let text = message.to_json().unwrap();
        let parsed = ChannelMessage::parse(&text).unwrap();

        assert_eq!(parsed, message);
    }

    #[test]
    fn test_wire_field_names() {
        let message = ChannelMessage {
            kind: "alert.raised".to_string(),
            payload: json!({"severity": "high", "message": "disk full"}),
            timestamp: 1,
        };

        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "alert.raised");
        assert!(value.get("payload").is_some());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_decode_known_kinds() {
        let metric = ChannelMessage {
            kind: "metric.update".to_string(),
            payload: json!({"value": 3.5, "metric": "cpu"}),
            timestamp: 1,
        };
        match metric.decode() {
            MessagePayload::MetricUpdate(update) => {
                assert_eq!(update.value, 3.5);
                assert_eq!(update.metric.as_deref(), Some("cpu"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        let alert = ChannelMessage {
            kind: "alert.raised".to_string(),
            payload: json!({"severity": "high", "message": "latency spike"}),
            timestamp: 1,
        };
        assert!(matches!(alert.decode(), MessagePayload::AlertRaised(_)));
    }

    #[test]
    fn test_decode_unknown_tag_falls_back() {
        let message = ChannelMessage {
            kind: "custom.thing".to_string(),
            payload: json!({"anything": true}),
            timestamp: 1,
        };
        match message.decode() {
            MessagePayload::Unknown(value) => assert_eq!(value["anything"], true),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_mismatched_shape_falls_back() {
        // Known tag but payload missing the required field
        let message = ChannelMessage {
            kind: "alert.raised".to_string(),
            payload: json!({"severity": "low"}),
            timestamp: 1,
        };
        assert!(matches!(message.decode(), MessagePayload::Unknown(_)));
    }

    #[test]
    fn test_malformed_frame_rejected() {
        assert!(ChannelMessage::parse("not json at all").is_err());
        assert!(ChannelMessage::parse(r#"{"type": "x"}"#).is_err());
    }
}
