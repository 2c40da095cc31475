//! ---
//! iot_section: "04-ingestion-latency"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Latency probe ingestion and device callback dispatch."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use serde::Deserialize;
use serde_json::Value;

use crate::errors::IngestError;

/// The two fields the ingestion side needs from a latency probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub device_id: String,
    pub start_timestamp: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProbe {
    device_id: Option<String>,
    start_timestamp: Option<Value>,
}

impl ProbeRequest {
    /// Parse a raw probe record. Extra fields are ignored.
    pub fn parse(record: &[u8]) -> Result<Self, IngestError> {
        if record.iter().all(u8::is_ascii_whitespace) {
            return Err(IngestError::MalformedProbe("empty record".into()));
        }
        let raw: RawProbe = serde_json::from_slice(record)
            .map_err(|err| IngestError::MalformedProbe(err.to_string()))?;

        let device_id = raw
            .device_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| IngestError::MalformedProbe("missing deviceId".into()))?;
        let start_timestamp = match raw.start_timestamp {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| IngestError::MalformedProbe("missing startTimestamp".into()))?;

        Ok(Self {
            device_id,
            start_timestamp,
        })
    }

    /// Payload sent with the device callback.
    pub fn callback_payload(&self) -> String {
        self.start_timestamp.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_emitted_by_devices() {
        let probe = ProbeRequest::parse(
            br#"{"deviceId":"press-01","messageType":"latency","startTimestamp":1700000000}"#,
        )
        .expect("valid probe");
        assert_eq!(probe.device_id, "press-01");
        assert_eq!(probe.callback_payload(), "1700000000");
    }

    #[test]
    fn missing_fields_are_malformed() {
        for record in [
            &br#"{"startTimestamp":1}"#[..],
            br#"{"deviceId":"","startTimestamp":1}"#,
            br#"{"deviceId":"press-01"}"#,
            br#"{"deviceId":"press-01","startTimestamp":"later"}"#,
            b"not json",
            b"  ",
        ] {
            assert!(
                matches!(ProbeRequest::parse(record), Err(IngestError::MalformedProbe(_))),
                "{}",
                String::from_utf8_lossy(record)
            );
        }
    }
}
