//! ---
//! iot_section: "04-ingestion-latency"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Latency probe ingestion and device callback dispatch."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use r_iot_msg::MessagingError;
use thiserror::Error;

/// Failure of a single probe record.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed latency probe: {0}")]
    MalformedProbe(String),
    #[error("device {device_id} did not answer the latency callback within {timeout:?}")]
    CallbackTimeout { device_id: String, timeout: Duration },
    #[error("device {device_id} rejected the latency callback with status {status}")]
    DeviceRejected { device_id: String, status: u16 },
    #[error("device {0} is not connected")]
    DeviceNotFound(String),
    #[error(transparent)]
    Transport(#[from] MessagingError),
}

/// A failed record together with its position in the batch.
#[derive(Debug)]
pub struct ItemFailure {
    pub index: usize,
    pub error: IngestError,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {}: {}", self.index, self.error)
    }
}

/// Surfaced after a whole batch has been processed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("latency batch had one failure: {0}")]
    Single(ItemFailure),
    #[error("latency batch had {} failures: {}", .0.len(), join(.0))]
    Aggregate(Vec<ItemFailure>),
}

impl BatchError {
    pub fn failures(&self) -> &[ItemFailure] {
        match self {
            BatchError::Single(failure) => std::slice::from_ref(failure),
            BatchError::Aggregate(failures) => failures,
        }
    }
}

fn join(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
