//! ---
//! iot_section: "02-messaging-ipc-data-model"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Message envelopes, command types, and transport interfaces."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Messaging primitives shared by the simulation runtime and the ingestion
//! pipeline: envelopes, command invocations and responses, the transport
//! collaborator interface, and an in-process hub used for local runs and tests.

pub mod hub;
pub mod logging;
pub mod metrics;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Failures surfaced by transports and envelope helpers.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The transport could not deliver or fetch data.
    #[error("transport failure on {transport}: {reason}")]
    TransportFailure {
        /// Name of the failing transport.
        transport: &'static str,
        /// Human-readable cause.
        reason: String,
    },
    /// No entity with the given artifact id is attached to the hub.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MessagingError {
    /// Convenience constructor for transport failures.
    pub fn transport(transport: &'static str, reason: impl Into<String>) -> Self {
        Self::TransportFailure {
            transport,
            reason: reason.into(),
        }
    }
}

pub use hub::InMemoryHub;
pub use logging::{log_message, MessageDirection};
pub use metrics::SimulationMetrics;
pub use transport::{
    CommandHandler, DesiredStateCallback, InMemoryTransport, Transport, TransportStats,
};
pub use types::{
    CommandInvocation, CommandPayload, CommandResponse, LatencyProbe, MessageEnvelope,
    MessageKind, StateMap, LATENCY_CALLBACK_COMMAND,
};
