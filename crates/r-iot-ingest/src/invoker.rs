//! ---
//! iot_section: "04-ingestion-latency"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Latency probe ingestion and device callback dispatch."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use async_trait::async_trait;
use r_iot_msg::{CommandInvocation, CommandResponse, InMemoryHub, MessagingError};

use crate::errors::IngestError;

/// Service-side handle able to call a command on a connected device.
#[async_trait]
pub trait DeviceMethodInvoker: Send + Sync {
    async fn invoke_device_method(
        &self,
        device_id: &str,
        invocation: CommandInvocation,
    ) -> Result<CommandResponse, IngestError>;
}

#[async_trait]
impl DeviceMethodInvoker for InMemoryHub {
    async fn invoke_device_method(
        &self,
        device_id: &str,
        invocation: CommandInvocation,
    ) -> Result<CommandResponse, IngestError> {
        self.invoke(device_id, invocation).await.map_err(|err| match err {
            MessagingError::UnknownEntity(id) => IngestError::DeviceNotFound(id),
            other => IngestError::Transport(other),
        })
    }
}
