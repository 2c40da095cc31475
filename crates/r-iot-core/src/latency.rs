//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
//! Device side of the latency round trip.
//!
//! A device emits a probe stamped with its current time. The ingestion side
//! later calls the device back with that start time, and the device answers
//! with the difference between its clock at callback time and the start.

use std::sync::Arc;

use futures::FutureExt;
use r_iot_common::SharedClock;
use r_iot_msg::{
    CommandHandler, CommandInvocation, CommandResponse, LatencyProbe, MessageEnvelope,
    SimulationMetrics,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::commands::{executed, names};
use crate::errors::PublishError;

/// Build a latency envelope stamped with the clock's current time.
pub fn probe_envelope(
    device_id: &str,
    clock: &SharedClock,
) -> Result<MessageEnvelope, PublishError> {
    Ok(LatencyProbe::new(device_id, clock.unix_seconds()).to_envelope()?)
}

/// `None` when the difference does not fit in an `i64`.
pub fn compute_latency(start: i64, callback_at: i64) -> Option<i64> {
    callback_at.checked_sub(start)
}

/// Handler for the latency callback command.
///
/// A payload that is not an integer timestamp, or one too far from the device
/// clock to subtract, is still acknowledged without a latency value.
pub fn callback_handler(
    artifact_id: String,
    clock: SharedClock,
    metrics: Option<SimulationMetrics>,
) -> CommandHandler {
    Arc::new(move |invocation: CommandInvocation| {
        let callback_at = clock.unix_seconds();
        let artifact_id = artifact_id.clone();
        let metrics = metrics.clone();
        async move {
            let mut body = executed(names::LATENCY_CALLBACK);
            let start = invocation.parsed_payload().as_integer();
            match start.and_then(|start| compute_latency(start, callback_at)) {
                Some(latency) => {
                    debug!(artifact_id = %artifact_id, start, latency, "latency callback");
                    if let Some(metrics) = &metrics {
                        metrics.observe_latency(latency);
                    }
                    body["latency"] = json!(latency);
                }
                None if start.is_some() => {
                    warn!(artifact_id = %artifact_id, start, "latency callback timestamp out of range");
                }
                None => {
                    warn!(artifact_id = %artifact_id, "latency callback payload is not a timestamp");
                }
            }
            CommandResponse::ok(body)
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_iot_common::ManualClock;

    #[tokio::test]
    async fn latency_is_callback_minus_start() {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let shared: SharedClock = clock.clone();
        let envelope = probe_envelope("dev-1", &shared).expect("probe");
        let start = envelope.body_json().expect("json")["startTimestamp"]
            .as_i64()
            .expect("timestamp");

        clock.advance(7);
        let handler = callback_handler("dev-1".into(), shared, None);
        let response = handler(CommandInvocation::new(
            names::LATENCY_CALLBACK,
            start.to_string(),
        ))
        .await;
        assert_eq!(response.status, 200);
        let body = response.body_json().expect("json");
        assert_eq!(body["latency"], 7);
        assert_eq!(body["result"], "Executed direct method: LatencyTestCallback");
    }

    #[tokio::test]
    async fn unparsable_start_is_acknowledged_without_latency() {
        let clock: SharedClock = Arc::new(ManualClock::new(5));
        let handler = callback_handler("dev-1".into(), clock, None);
        let response = handler(CommandInvocation::new(names::LATENCY_CALLBACK, "soon")).await;
        assert_eq!(response.status, 200);
        let body = response.body_json().expect("json");
        assert!(body.get("latency").is_none());
    }

    #[tokio::test]
    async fn out_of_range_start_is_acknowledged_without_latency() {
        let clock: SharedClock = Arc::new(ManualClock::new(1_700_000_000));
        let handler = callback_handler("dev-1".into(), clock, None);
        let response = handler(CommandInvocation::new(
            names::LATENCY_CALLBACK,
            i64::MIN.to_string(),
        ))
        .await;
        assert_eq!(response.status, 200);
        let body = response.body_json().expect("json");
        assert!(body.get("latency").is_none());
        assert_eq!(compute_latency(i64::MIN, 1), None);
        assert_eq!(compute_latency(10, 4), Some(-6));
    }
}
