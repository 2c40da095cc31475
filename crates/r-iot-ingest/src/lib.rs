//! ---
//! iot_section: "04-ingestion-latency"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Latency probe ingestion and device callback dispatch."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
//! Cloud-side half of the latency round trip: batches of probe records are
//! parsed, each probe is answered by invoking the originating device's
//! callback command, and per-item failures are collected without stopping
//! the rest of the batch.

pub mod batch;
pub mod errors;
pub mod invoker;
pub mod pipeline;
pub mod probe;

pub use batch::{BatchOutcome, DispatchedProbe, LatencyBatchProcessor, DEFAULT_CALLBACK_TIMEOUT};
pub use errors::{BatchError, IngestError, ItemFailure};
pub use invoker::DeviceMethodInvoker;
pub use pipeline::{IngestionPipeline, PipelineStats};
pub use probe::ProbeRequest;
