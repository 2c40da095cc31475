//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
//! Built-in command handlers. Each one answers immediately; anything slow is
//! started on a detached task.

use std::sync::Arc;

use futures::FutureExt;
use r_iot_msg::{CommandHandler, CommandInvocation, CommandPayload, CommandResponse};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::reboot::RebootOrchestrator;
use crate::state::RuntimeState;
use crate::twin::TwinReporter;

pub mod names {
    pub const SET_TELEMETRY_INTERVAL: &str = "SetTelemetryInterval";
    pub const REBOOT: &str = "Reboot";
    pub const ON_OFF: &str = "OnOff";
    pub const READ_TWINS: &str = "ReadTwins";
    pub const GENERIC_OPAQUE: &str = "GenericJToken";
    pub const GENERIC: &str = "Generic";
    pub const LATENCY_CALLBACK: &str = r_iot_msg::LATENCY_CALLBACK_COMMAND;
    pub const SEND_LATENCY_TEST: &str = "SendLatencyTest";
}

/// Starts a one-shot latency probe for the entity.
pub type LatencyLauncher = Arc<dyn Fn() + Send + Sync>;

/// `{"result":"Executed direct method: <name>"}`.
pub fn executed(name: &str) -> Value {
    json!({ "result": format!("Executed direct method: {}", name) })
}

fn invalid(detail: &str) -> CommandResponse {
    CommandResponse::bad_request(json!({ "result": "Invalid parameter", "detail": detail }))
}

fn respond<F>(f: F) -> CommandHandler
where
    F: Fn(CommandInvocation) -> CommandResponse + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |invocation: CommandInvocation| {
        let f = f.clone();
        async move { f(invocation) }.boxed()
    })
}

/// Parses a positive integer number of seconds into the telemetry interval.
pub fn set_telemetry_interval(artifact_id: String, state: Arc<RuntimeState>) -> CommandHandler {
    respond(move |invocation| match invocation.parsed_payload().as_integer() {
        Some(seconds) if seconds > 0 => {
            state.set_telemetry_interval(seconds);
            info!(artifact_id = %artifact_id, seconds, "telemetry interval updated");
            CommandResponse::ok(executed(&invocation.name))
        }
        Some(seconds) => {
            warn!(artifact_id = %artifact_id, seconds, "rejected non-positive telemetry interval");
            invalid("interval must be a positive number of seconds")
        }
        None => {
            warn!(artifact_id = %artifact_id, "telemetry interval payload is not an integer");
            invalid("payload must be an integer number of seconds")
        }
    })
}

/// Acknowledges at once and runs the reboot sequence detached.
pub fn reboot(artifact_id: String, orchestrator: Arc<RebootOrchestrator>) -> CommandHandler {
    respond(move |invocation| match orchestrator.trigger() {
        Ok(_) => CommandResponse::ok(executed(&invocation.name)),
        Err(err) => {
            warn!(artifact_id = %artifact_id, error = %err, "reboot ignored");
            CommandResponse::ok(json!({ "result": err.to_string() }))
        }
    })
}

/// Echoes a JSON object payload; anything else is a 400.
pub fn on_off(artifact_id: String) -> CommandHandler {
    respond(move |invocation| match invocation.parsed_payload() {
        CommandPayload::Object(map) => {
            debug!(artifact_id = %artifact_id, "on/off command received");
            let mut body = executed(&invocation.name);
            body["payload"] = Value::Object(map);
            CommandResponse::ok(body)
        }
        _ => invalid("payload must be a JSON object"),
    })
}

/// Reads and logs the twin document on a detached task.
pub fn read_twins(twin: TwinReporter) -> CommandHandler {
    respond(move |invocation| {
        let twin = twin.clone();
        tokio::spawn(async move {
            twin.read_and_log("command").await;
        });
        CommandResponse::ok(executed(&invocation.name))
    })
}

/// Acknowledges and echoes whatever payload arrived.
pub fn generic(artifact_id: String) -> CommandHandler {
    respond(move |invocation| {
        let payload = invocation.parsed_payload();
        debug!(artifact_id = %artifact_id, command = %invocation.name, payload = ?payload, "generic command received");
        let mut body = executed(&invocation.name);
        if let Some(echo) = payload.echo() {
            body["payload"] = echo;
        }
        CommandResponse::ok(body)
    })
}

/// Launches a single latency probe.
pub fn send_latency_test(launch: LatencyLauncher) -> CommandHandler {
    respond(move |invocation| {
        launch();
        CommandResponse::ok(executed(&invocation.name))
    })
}
