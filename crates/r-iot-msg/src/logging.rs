//! ---
//! iot_section: "02-messaging-ipc-data-model"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Message envelopes, command types, and transport interfaces."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use tracing::debug;

/// Direction of message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Device-to-cloud message handed to a transport.
    Outbound,
    /// Cloud-to-device message taken from a transport.
    Inbound,
    /// Command invocation delivered to an entity.
    Command,
}

/// Emit a structured log entry for messaging activity.
///
/// `label` is the message kind for envelopes and the command name for
/// invocations.
pub fn log_message(direction: MessageDirection, artifact_id: &str, label: &str) {
    debug!(
        artifact_id = %artifact_id,
        label = %label,
        direction = ?direction,
        "messaging activity"
    );
}
