//! ---
//! iot_section: "02-messaging-ipc-data-model"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Message envelopes, command types, and transport interfaces."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use strum::{AsRefStr, Display, EnumIter};
use uuid::Uuid;

/// Content type attached to every simulated message.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Encoding attached to every simulated message.
pub const ENCODING_UTF8: &str = "utf-8";
/// Device command the ingestion side invokes to close a latency round trip.
pub const LATENCY_CALLBACK_COMMAND: &str = "LatencyTestCallback";

/// Key/value document exchanged with the cloud-resident twin.
pub type StateMap = Map<String, JsonValue>;

/// Message streams a simulated entity can emit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    /// Periodic measured data.
    Telemetry,
    /// Simulated fault reports.
    Error,
    /// Commissioning records.
    Commissioning,
    /// Round-trip latency probes.
    Latency,
}

impl MessageKind {
    /// Application property name carrying the message type.
    ///
    /// Telemetry uses the camel-cased `messageType`; the other kinds have
    /// always been routed on the lower-cased `messagetype`.
    pub fn property_key(&self) -> &'static str {
        match self {
            MessageKind::Telemetry => "messageType",
            _ => "messagetype",
        }
    }

    /// Application property value carrying the message type.
    pub fn property_value(&self) -> &'static str {
        match self {
            MessageKind::Telemetry => "data",
            MessageKind::Error => "error",
            MessageKind::Commissioning => "commissioning",
            MessageKind::Latency => "latency",
        }
    }

    /// Name of the canonical template backing this kind, if it uses one.
    pub fn template_name(&self) -> Option<&'static str> {
        match self {
            MessageKind::Telemetry => Some("measureddata"),
            MessageKind::Error => Some("error"),
            MessageKind::Commissioning => Some("commissioning"),
            MessageKind::Latency => None,
        }
    }
}

/// Outbound or inbound message as handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    /// Unique identifier for tracing.
    pub id: Uuid,
    /// Stream that produced the message.
    pub kind: MessageKind,
    /// MIME content type of `body`.
    pub content_type: String,
    /// Character encoding of `body`.
    pub encoding: String,
    /// Application properties used for routing on the ingestion side.
    pub properties: BTreeMap<String, String>,
    /// Serialized payload.
    pub body: Bytes,
    /// Creation time of the envelope.
    pub created_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Build a JSON envelope with the routing property for `kind` set.
    pub fn json(kind: MessageKind, body: impl Into<Bytes>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            kind.property_key().to_owned(),
            kind.property_value().to_owned(),
        );
        Self {
            id: Uuid::new_v4(),
            kind,
            content_type: CONTENT_TYPE_JSON.to_owned(),
            encoding: ENCODING_UTF8.to_owned(),
            properties,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    /// Look up an application property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Decode the body as JSON.
    pub fn body_json(&self) -> crate::Result<JsonValue> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Body of a latency probe message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyProbe {
    /// Device that emitted the probe.
    pub device_id: String,
    /// Always `latency`.
    pub message_type: String,
    /// Emission time in unix seconds.
    pub start_timestamp: i64,
}

impl LatencyProbe {
    /// Build a probe stamped with `start_timestamp`.
    pub fn new(device_id: impl Into<String>, start_timestamp: i64) -> Self {
        Self {
            device_id: device_id.into(),
            message_type: MessageKind::Latency.property_value().to_owned(),
            start_timestamp,
        }
    }

    /// Wrap the probe in a latency envelope.
    pub fn to_envelope(&self) -> crate::Result<MessageEnvelope> {
        let body = serde_json::to_vec(self)?;
        Ok(MessageEnvelope::json(MessageKind::Latency, body))
    }
}

/// A named command delivered to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Command name, matched exactly against registered handlers.
    pub name: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl CommandInvocation {
    /// Create an invocation.
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Parse the payload into its tagged representation.
    pub fn parsed_payload(&self) -> CommandPayload {
        CommandPayload::parse(&self.payload)
    }
}

/// Result of a command handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// JSON body.
    pub body: Bytes,
}

impl CommandResponse {
    /// Build a response carrying `body` serialized as JSON.
    pub fn new(status: u16, body: &JsonValue) -> Self {
        Self {
            status,
            body: Bytes::from(body.to_string()),
        }
    }

    /// 200 response.
    pub fn ok(body: JsonValue) -> Self {
        Self::new(200, &body)
    }

    /// 400 response.
    pub fn bad_request(body: JsonValue) -> Self {
        Self::new(400, &body)
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON, if it is JSON.
    pub fn body_json(&self) -> Option<JsonValue> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Command payload interpreted per handler.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// No payload, or only whitespace.
    Empty,
    /// A JSON integer.
    Integer(i64),
    /// A JSON string, or any non-JSON UTF-8 text.
    Text(String),
    /// A JSON object.
    Object(Map<String, JsonValue>),
    /// Bytes that are not valid UTF-8.
    Opaque(Bytes),
}

impl CommandPayload {
    /// Classify raw payload bytes.
    pub fn parse(raw: &[u8]) -> Self {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text.trim(),
            Err(_) => return CommandPayload::Opaque(Bytes::copy_from_slice(raw)),
        };
        if text.is_empty() {
            return CommandPayload::Empty;
        }
        match serde_json::from_str::<JsonValue>(text) {
            Ok(JsonValue::Object(map)) => CommandPayload::Object(map),
            Ok(JsonValue::String(s)) => CommandPayload::Text(s),
            Ok(JsonValue::Number(n)) if n.is_i64() => {
                n.as_i64().map_or(CommandPayload::Text(text.to_owned()), CommandPayload::Integer)
            }
            _ => CommandPayload::Text(text.to_owned()),
        }
    }

    /// Interpret the payload as an integer, accepting quoted digits.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CommandPayload::Integer(n) => Some(*n),
            CommandPayload::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// JSON rendition used when echoing the payload back; `None` when empty.
    pub fn echo(&self) -> Option<JsonValue> {
        match self {
            CommandPayload::Empty => None,
            CommandPayload::Integer(n) => Some(JsonValue::from(*n)),
            CommandPayload::Text(s) => Some(JsonValue::String(s.clone())),
            CommandPayload::Object(map) => Some(JsonValue::Object(map.clone())),
            CommandPayload::Opaque(raw) => {
                Some(JsonValue::String(String::from_utf8_lossy(raw).into_owned()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn telemetry_routes_on_camel_case_property() {
        let envelope = MessageEnvelope::json(MessageKind::Telemetry, "{}");
        assert_eq!(envelope.property("messageType"), Some("data"));
        assert_eq!(envelope.content_type, "application/json");
        assert_eq!(envelope.encoding, "utf-8");

        for kind in MessageKind::iter().filter(|k| *k != MessageKind::Telemetry) {
            let envelope = MessageEnvelope::json(kind, "{}");
            assert_eq!(envelope.property("messagetype"), Some(kind.as_ref()));
        }
    }

    #[test]
    fn latency_probe_uses_camel_case_fields() {
        let envelope = LatencyProbe::new("dev-1", 1_700_000_000)
            .to_envelope()
            .expect("probe serializes");
        assert_eq!(
            envelope.body_json().expect("json body"),
            json!({"deviceId": "dev-1", "messageType": "latency", "startTimestamp": 1_700_000_000})
        );
    }

    #[test]
    fn payload_classification() {
        assert_eq!(CommandPayload::parse(b""), CommandPayload::Empty);
        assert_eq!(CommandPayload::parse(b" 15 "), CommandPayload::Integer(15));
        assert_eq!(
            CommandPayload::parse(b"\"bar\""),
            CommandPayload::Text("bar".into())
        );
        assert_eq!(CommandPayload::parse(b"abc"), CommandPayload::Text("abc".into()));
        assert!(matches!(
            CommandPayload::parse(br#"{"on":true}"#),
            CommandPayload::Object(_)
        ));
        assert!(matches!(
            CommandPayload::parse(&[0xff, 0xfe]),
            CommandPayload::Opaque(_)
        ));
        assert_eq!(CommandPayload::parse(b"\"42\"").as_integer(), Some(42));
        assert_eq!(CommandPayload::parse(b"4.5").as_integer(), None);
    }
}
