//! ---
//! iot_section: "11-simulation"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Template loading, identity stamping, and value randomization."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::Path;

use rand::Rng;
use r_iot_common::{Clock, EntityIdentity};
use r_iot_msg::MessageKind;
use serde_json::{Map, Value};
use tracing::trace;

use crate::{Result, TemplateError};

const MEASURED_DATA: &str = include_str!("../messages/measureddata.json");
const ERROR: &str = include_str!("../messages/error.json");
const COMMISSIONING: &str = include_str!("../messages/commissioning.json");

/// Randomized measurement values fall in `[VALUE_MIN, VALUE_MAX)`.
pub const VALUE_MIN: i64 = 150;
pub const VALUE_MAX: i64 = 300;

/// Canonical message bodies keyed by message kind.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<MessageKind, String>,
}

impl TemplateStore {
    /// Store with no templates; every kind yields `TemplateNotFound`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Store backed by the templates compiled into this crate.
    pub fn embedded() -> Self {
        Self::empty()
            .with_template(MessageKind::Telemetry, MEASURED_DATA)
            .with_template(MessageKind::Error, ERROR)
            .with_template(MessageKind::Commissioning, COMMISSIONING)
    }

    /// Load `<template_name>.json` for each kind from `dir`. Missing files are
    /// skipped and surface later as `TemplateNotFound`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut store = Self::empty();
        for kind in [
            MessageKind::Telemetry,
            MessageKind::Error,
            MessageKind::Commissioning,
        ] {
            let Some(name) = kind.template_name() else {
                continue;
            };
            let path = dir.join(format!("{}.json", name));
            if !path.exists() {
                continue;
            }
            let body = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                path: path.display().to_string(),
                source,
            })?;
            store = store.with_template(kind, body);
        }
        Ok(store)
    }

    pub fn with_template(mut self, kind: MessageKind, body: impl Into<String>) -> Self {
        self.templates.insert(kind, body.into());
        self
    }

    /// Canonical body for `kind`.
    pub fn produce_message(&self, kind: MessageKind) -> Result<&str> {
        self.templates
            .get(&kind)
            .map(String::as_str)
            .filter(|body| !body.trim().is_empty())
            .ok_or(TemplateError::TemplateNotFound(kind))
    }

    /// Template for `kind`, stamped with `identity` and randomized at `clock`'s now.
    pub fn render(
        &self,
        kind: MessageKind,
        identity: &EntityIdentity,
        clock: &dyn Clock,
    ) -> Result<Vec<u8>> {
        let template = self.produce_message(kind)?;
        let stamped = stamp_identity(
            template,
            &identity.device_id,
            identity.module_id.as_deref(),
        )?;
        let body = randomize_with(&stamped, &mut rand::thread_rng(), clock.unix_seconds())?;
        trace!(artifact_id = %identity.artifact_id(), kind = %kind, "template rendered");
        Ok(body.into_bytes())
    }
}

fn parse_object(body: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TemplateError::MalformedTemplate(format!(
            "expected a JSON object, found {}",
            json_type(&other)
        ))),
        Err(err) => Err(TemplateError::MalformedTemplate(err.to_string())),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn serialize(map: Map<String, Value>) -> Result<String> {
    serde_json::to_string_pretty(&Value::Object(map))
        .map_err(|err| TemplateError::MalformedTemplate(err.to_string()))
}

/// Re-stamp every data item with the current time and a fresh random value.
pub fn randomize(body: &str) -> Result<String> {
    randomize_with(
        body,
        &mut rand::thread_rng(),
        r_iot_common::time::unix_now(),
    )
}

/// Like [`randomize`], with an explicit generator and timestamp.
///
/// Bodies without a `data` array pass through unchanged. Values are written as
/// strings to match the template's `propertyValue` type.
pub fn randomize_with<R: Rng + ?Sized>(body: &str, rng: &mut R, now: i64) -> Result<String> {
    let mut map = parse_object(body)?;
    if let Some(Value::Array(items)) = map.get_mut("data") {
        for (index, item) in items.iter_mut().enumerate() {
            let Value::Object(item) = item else {
                return Err(TemplateError::MalformedTemplate(format!(
                    "data item {} is {}, expected an object",
                    index,
                    json_type(item)
                )));
            };
            item.insert("timestamp".into(), Value::from(now));
            let value = rng.gen_range(VALUE_MIN..VALUE_MAX);
            item.insert("propertyValue".into(), Value::String(value.to_string()));
        }
    }
    serialize(map)
}

/// Rewrite `deviceId`, and `moduleId` when given, if the template declares them.
pub fn stamp_identity(body: &str, device_id: &str, module_id: Option<&str>) -> Result<String> {
    if device_id.is_empty() {
        return Err(TemplateError::MissingIdentity);
    }
    let mut map = parse_object(body)?;
    if let Some(slot) = map.get_mut("deviceId") {
        *slot = Value::String(device_id.to_owned());
    }
    if let Some(module_id) = module_id.filter(|id| !id.is_empty()) {
        if let Some(slot) = map.get_mut("moduleId") {
            *slot = Value::String(module_id.to_owned());
        }
    }
    serialize(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn data_items(body: &str) -> Vec<Map<String, Value>> {
        let value: Value = serde_json::from_str(body).expect("valid json");
        value["data"]
            .as_array()
            .expect("data array")
            .iter()
            .map(|item| item.as_object().expect("object item").clone())
            .collect()
    }

    #[test]
    fn embedded_store_serves_all_templated_kinds() {
        let store = TemplateStore::embedded();
        for kind in [
            MessageKind::Telemetry,
            MessageKind::Error,
            MessageKind::Commissioning,
        ] {
            assert!(store.produce_message(kind).is_ok(), "{} missing", kind);
        }
        assert!(matches!(
            store.produce_message(MessageKind::Latency),
            Err(TemplateError::TemplateNotFound(MessageKind::Latency))
        ));
    }

    #[test]
    fn blank_template_counts_as_missing() {
        let store = TemplateStore::empty().with_template(MessageKind::Error, "   ");
        assert!(matches!(
            store.produce_message(MessageKind::Error),
            Err(TemplateError::TemplateNotFound(MessageKind::Error))
        ));
    }

    #[test]
    fn randomize_rewrites_every_item_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let body = randomize_with(MEASURED_DATA, &mut rng, 1_700_000_123).expect("randomize");
        let items = data_items(&body);
        assert_eq!(items.len(), 2);
        for item in items {
            assert_eq!(item["timestamp"], Value::from(1_700_000_123));
            let value: i64 = item["propertyValue"]
                .as_str()
                .expect("string value")
                .parse()
                .expect("numeric string");
            assert!((VALUE_MIN..VALUE_MAX).contains(&value));
            assert!(item.contains_key("propertyUnit"));
        }
    }

    #[test]
    fn two_randomizations_differ_in_values_not_shape() {
        let first = randomize(MEASURED_DATA).expect("first");
        let mut second = randomize(MEASURED_DATA).expect("second");
        for _ in 0..8 {
            if second != first {
                break;
            }
            second = randomize(MEASURED_DATA).expect("retry");
        }
        let a = data_items(&first);
        let b = data_items(&second);
        let keys = |items: &[Map<String, Value>]| {
            items
                .iter()
                .map(|i| i.keys().cloned().collect::<Vec<_>>())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&a), keys(&b));
        let values = |items: &[Map<String, Value>]| {
            items
                .iter()
                .map(|i| i["propertyValue"].clone())
                .collect::<Vec<_>>()
        };
        assert_ne!(values(&a), values(&b));
    }

    #[test]
    fn non_data_kinds_pass_through() {
        let mut rng = StdRng::seed_from_u64(1);
        let body = randomize_with(ERROR, &mut rng, 5).expect("randomize");
        let original: Value = serde_json::from_str(ERROR).expect("json");
        let rendered: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(original, rendered);
    }

    #[test]
    fn malformed_bodies_are_reported() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            randomize_with("not json", &mut rng, 0),
            Err(TemplateError::MalformedTemplate(_))
        ));
        assert!(matches!(
            randomize_with("[1,2]", &mut rng, 0),
            Err(TemplateError::MalformedTemplate(_))
        ));
        assert!(matches!(
            randomize_with(r#"{"data":[1]}"#, &mut rng, 0),
            Err(TemplateError::MalformedTemplate(_))
        ));
        assert!(matches!(
            stamp_identity("{", "dev", None),
            Err(TemplateError::MalformedTemplate(_))
        ));
    }

    #[test]
    fn stamp_identity_only_touches_identity_fields() {
        let body = stamp_identity(COMMISSIONING, "press-01", Some("filter")).expect("stamp");
        let value: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(value["deviceId"], "press-01");
        assert_eq!(value["moduleId"], "filter");
        assert_eq!(value["room"], "204");

        let without_module = stamp_identity(r#"{"deviceId":"x","extra":1}"#, "dev", Some("m"))
            .expect("stamp");
        let value: Value = serde_json::from_str(&without_module).expect("json");
        assert_eq!(value, serde_json::json!({"deviceId": "dev", "extra": 1}));

        assert!(matches!(
            stamp_identity(COMMISSIONING, "", None),
            Err(TemplateError::MissingIdentity)
        ));
    }
}
