//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use r_iot_msg::{CommandHandler, CommandInvocation, CommandResponse, SimulationMetrics};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::DispatchError;

/// Routes named commands to registered handlers.
pub struct CommandDispatcher {
    artifact_id: String,
    handlers: RwLock<HashMap<String, CommandHandler>>,
    fallback: CommandHandler,
    metrics: Option<SimulationMetrics>,
}

impl CommandDispatcher {
    pub fn new(artifact_id: impl Into<String>) -> Self {
        let artifact_id = artifact_id.into();
        Self {
            fallback: default_handler(artifact_id.clone()),
            artifact_id,
            handlers: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<SimulationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn register(&self, name: &str, handler: CommandHandler) -> Result<(), DispatchError> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(name) {
            return Err(DispatchError::DuplicateHandler(name.to_owned()));
        }
        handlers.insert(name.to_owned(), handler);
        debug!(artifact_id = %self.artifact_id, command = name, "command handler registered");
        Ok(())
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Exact-name lookup, falling back to the default handler.
    pub async fn dispatch(&self, invocation: CommandInvocation) -> CommandResponse {
        let name = invocation.name.clone();
        let handler = self
            .handlers
            .read()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        let response = handler(invocation).await;
        debug!(artifact_id = %self.artifact_id, command = %name, status = response.status, "command dispatched");
        if let Some(metrics) = &self.metrics {
            metrics.observe_command(&name, response.status);
        }
        response
    }
}

/// Acknowledges any command with a message naming it and the echoed payload.
pub fn default_handler(artifact_id: String) -> CommandHandler {
    Arc::new(move |invocation: CommandInvocation| {
        let artifact_id = artifact_id.clone();
        async move {
            warn!(artifact_id = %artifact_id, command = %invocation.name, "no specific handler registered");
            let payload = invocation
                .parsed_payload()
                .echo()
                .unwrap_or_else(|| Value::String(String::new()));
            CommandResponse::ok(json!({
                "result": format!(
                    "Request direct method: {} but no specific direct method handler.",
                    invocation.name
                ),
                "payload": payload,
            }))
        }
        .boxed()
    })
}
