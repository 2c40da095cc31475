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
use std::sync::Arc;

use parking_lot::RwLock;
use r_iot_common::EntityIdentity;

use crate::transport::InMemoryTransport;
use crate::types::{CommandInvocation, CommandResponse, MessageEnvelope};
use crate::{MessagingError, Result};

/// Process-local stand-in for the cloud endpoint.
///
/// Holds one [`InMemoryTransport`] per attached entity, keyed by artifact id,
/// and lets the ingestion side collect device-to-cloud traffic and invoke
/// commands on a named entity.
#[derive(Default, Clone)]
pub struct InMemoryHub {
    endpoints: Arc<RwLock<BTreeMap<String, Arc<InMemoryTransport>>>>,
}

impl InMemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the transport for `identity`, creating it on first use.
    pub fn attach(&self, identity: &EntityIdentity) -> Arc<InMemoryTransport> {
        let artifact_id = identity.artifact_id();
        if let Some(existing) = self.endpoints.read().get(&artifact_id) {
            return existing.clone();
        }
        self.endpoints
            .write()
            .entry(artifact_id.clone())
            .or_insert_with(|| Arc::new(InMemoryTransport::new(artifact_id)))
            .clone()
    }

    /// Look up an attached endpoint.
    pub fn endpoint(&self, artifact_id: &str) -> Option<Arc<InMemoryTransport>> {
        self.endpoints.read().get(artifact_id).cloned()
    }

    /// Artifact ids of every attached entity.
    pub fn artifacts(&self) -> Vec<String> {
        self.endpoints.read().keys().cloned().collect()
    }

    /// Invoke a command on the entity with `artifact_id`.
    pub async fn invoke(
        &self,
        artifact_id: &str,
        invocation: CommandInvocation,
    ) -> Result<CommandResponse> {
        let endpoint = self
            .endpoint(artifact_id)
            .ok_or_else(|| MessagingError::UnknownEntity(artifact_id.to_owned()))?;
        Ok(endpoint.invoke(invocation).await)
    }

    /// Collect every queued device-to-cloud envelope, tagged with its sender.
    pub fn drain_outbound(&self) -> Vec<(String, MessageEnvelope)> {
        let endpoints: Vec<_> = self
            .endpoints
            .read()
            .iter()
            .map(|(id, endpoint)| (id.clone(), endpoint.clone()))
            .collect();
        endpoints
            .into_iter()
            .flat_map(|(id, endpoint)| {
                endpoint
                    .drain_outbound()
                    .into_iter()
                    .map(move |envelope| (id.clone(), envelope))
            })
            .collect()
    }
}
