//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::sync::Arc;

use r_iot_msg::{StateMap, Transport};
use serde_json::{json, Value};
use strum::{AsRefStr, Display};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RebootStatus {
    Rebooting,
    Online,
}

/// Best-effort writer for the reported section of an entity's twin.
///
/// Every method logs failures and returns whether the transport accepted the
/// update; nothing here propagates an error.
#[derive(Clone)]
pub struct TwinReporter {
    artifact_id: String,
    transport: Arc<dyn Transport>,
}

impl TwinReporter {
    pub fn new(artifact_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            transport,
        }
    }

    pub async fn report(&self, patch: StateMap) -> bool {
        match self.transport.report_state(patch).await {
            Ok(()) => true,
            Err(err) => {
                error!(artifact_id = %self.artifact_id, error = %err, "reported property update failed");
                false
            }
        }
    }

    pub async fn report_connectivity(&self, link: &str, signal_power: &str) -> bool {
        debug!(artifact_id = %self.artifact_id, "reporting connectivity");
        self.report(object(json!({
            "connectivity": { "type": link, "signalPower": signal_power }
        })))
        .await
    }

    pub async fn report_property(&self, name: &str, value: Value) -> bool {
        debug!(artifact_id = %self.artifact_id, property = name, "reporting property");
        let mut patch = StateMap::new();
        patch.insert(name.to_owned(), value);
        self.report(patch).await
    }

    pub async fn report_firmware_update(&self, version: &str, url: &str) -> bool {
        debug!(artifact_id = %self.artifact_id, version, "reporting firmware update");
        self.report(object(json!({
            "newFirmwareVersion": version,
            "firmwareUrl": url,
        })))
        .await
    }

    /// `iothubDM: { reboot: { lastReboot }, rebootStatus }`.
    pub async fn report_reboot_status(&self, last_reboot: &str, status: RebootStatus) -> bool {
        self.report(object(json!({
            "iothubDM": {
                "reboot": { "lastReboot": last_reboot },
                "rebootStatus": status.as_ref(),
            }
        })))
        .await
    }

    /// Act on a desired-state patch: a firmware target (`Vs`, with its URL in
    /// `Ur`) is acknowledged as a firmware update, and each mirrored key is
    /// echoed back as a reported property. Returns how many reports were accepted.
    pub async fn apply_desired(&self, patch: &StateMap) -> usize {
        let mut accepted = 0;
        if let Some(version) = patch.get(desired::FIRMWARE_VERSION) {
            let version = text(version);
            let url = patch.get(desired::FIRMWARE_URL).map(text).unwrap_or_default();
            debug!(artifact_id = %self.artifact_id, version = %version, "firmware update requested");
            accepted += usize::from(self.report_firmware_update(&version, &url).await);
        }
        for key in desired::MIRRORED {
            if let Some(value) = patch.get(key) {
                accepted += usize::from(self.report_property(key, value.clone()).await);
            }
        }
        accepted
    }

    /// Fetch the twin document and log it, or log that none exists.
    pub async fn read_and_log(&self, context: &str) -> Option<StateMap> {
        match self.transport.get_state().await {
            Ok(Some(document)) => {
                let twin = serde_json::Value::Object(document.clone());
                debug!(artifact_id = %self.artifact_id, context, twin = %twin, "twin document read");
                Some(document)
            }
            Ok(None) => {
                debug!(artifact_id = %self.artifact_id, context, "no twin document available");
                None
            }
            Err(err) => {
                error!(artifact_id = %self.artifact_id, context, error = %err, "twin read failed");
                None
            }
        }
    }
}

/// Desired-state keys acted on by [`TwinReporter::apply_desired`].
pub mod desired {
    pub const FIRMWARE_VERSION: &str = "Vs";
    pub const FIRMWARE_URL: &str = "Ur";
    pub const MIRRORED: [&str; 2] = ["testUpdate", "Ak"];
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn object(value: Value) -> StateMap {
    match value {
        Value::Object(map) => map,
        _ => StateMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_iot_msg::InMemoryTransport;

    #[tokio::test]
    async fn reboot_status_nests_under_device_management() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        let reporter = TwinReporter::new("dev-1", transport.clone());
        assert!(
            reporter
                .report_reboot_status("2026-01-01T00:00:00+00:00", RebootStatus::Rebooting)
                .await
        );
        assert_eq!(
            Value::Object(transport.reported()),
            json!({
                "iothubDM": {
                    "reboot": { "lastReboot": "2026-01-01T00:00:00+00:00" },
                    "rebootStatus": "rebooting"
                }
            })
        );
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        transport.set_fail_reports(true);
        let reporter = TwinReporter::new("dev-1", transport.clone());
        assert!(!reporter.report_connectivity("cellular", "low").await);
        assert!(reporter.read_and_log("test").await.is_none());

        transport.set_fail_reports(false);
        assert!(reporter.report_firmware_update("2.0.1", "https://fw.invalid/2.0.1").await);
        assert!(reporter.report_property("mode", json!("eco")).await);
        let reported = transport.reported();
        assert_eq!(reported["newFirmwareVersion"], "2.0.1");
        assert_eq!(reported["mode"], "eco");
        assert!(reporter.read_and_log("test").await.is_some());
    }

    #[tokio::test]
    async fn desired_firmware_and_mirrored_keys_are_reported() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        let reporter = TwinReporter::new("dev-1", transport.clone());
        let patch = object(json!({
            "Vs": "3.1.0",
            "Ur": "https://fw.invalid/3.1.0",
            "Ak": { "level": 2 },
            "unrelated": true,
        }));
        assert_eq!(reporter.apply_desired(&patch).await, 2);

        let reported = transport.reported();
        assert_eq!(reported["newFirmwareVersion"], "3.1.0");
        assert_eq!(reported["firmwareUrl"], "https://fw.invalid/3.1.0");
        assert_eq!(reported["Ak"], json!({ "level": 2 }));
        assert!(reported.get("unrelated").is_none());
        assert_eq!(reporter.apply_desired(&StateMap::new()).await, 0);
    }
}
