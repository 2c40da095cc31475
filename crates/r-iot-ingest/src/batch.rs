//! ---
//! iot_section: "04-ingestion-latency"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Latency probe ingestion and device callback dispatch."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use r_iot_msg::{CommandInvocation, CommandResponse, LATENCY_CALLBACK_COMMAND};
use tracing::{debug, error, info, warn};

use crate::errors::{BatchError, IngestError, ItemFailure};
use crate::invoker::DeviceMethodInvoker;
use crate::probe::ProbeRequest;

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// A probe whose callback the device acknowledged.
#[derive(Debug, Clone)]
pub struct DispatchedProbe {
    pub index: usize,
    pub probe: ProbeRequest,
    pub response: CommandResponse,
}

/// Per-item results of one batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub dispatched: Vec<DispatchedProbe>,
    pub failures: Vec<ItemFailure>,
}

impl BatchOutcome {
    pub fn processed(&self) -> usize {
        self.dispatched.len() + self.failures.len()
    }

    /// Collapse into the batch verdict: one failure is surfaced as is, several
    /// are aggregated, none is success with the dispatched count.
    pub fn into_result(mut self) -> Result<usize, BatchError> {
        match self.failures.len() {
            0 => Ok(self.dispatched.len()),
            1 => match self.failures.pop() {
                Some(failure) => Err(BatchError::Single(failure)),
                None => Ok(self.dispatched.len()),
            },
            _ => Err(BatchError::Aggregate(self.failures)),
        }
    }
}

/// Answers latency probes by calling each device back with its start timestamp.
pub struct LatencyBatchProcessor {
    invoker: Arc<dyn DeviceMethodInvoker>,
    callback_timeout: Duration,
}

impl LatencyBatchProcessor {
    pub fn new(invoker: Arc<dyn DeviceMethodInvoker>) -> Self {
        Self {
            invoker,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Process every record in order. A failing record never stops the rest.
    pub async fn process_batch<R: AsRef<[u8]>>(&self, records: &[R]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, record) in records.iter().enumerate() {
            match self.process_record(record.as_ref()).await {
                Ok((probe, response)) => {
                    debug!(index, device_id = %probe.device_id, status = response.status, "latency callback acknowledged");
                    outcome.dispatched.push(DispatchedProbe {
                        index,
                        probe,
                        response,
                    });
                }
                Err(err) => {
                    error!(index, error = %err, "latency record failed");
                    outcome.failures.push(ItemFailure { index, error: err });
                }
            }
        }
        if outcome.failures.is_empty() {
            info!(records = records.len(), "latency batch processed");
        } else {
            warn!(
                records = records.len(),
                failed = outcome.failures.len(),
                "latency batch processed with failures"
            );
        }
        outcome
    }

    /// Convenience wrapper for callers that hold envelope bodies.
    pub async fn process_bodies(&self, bodies: &[Bytes]) -> Result<usize, BatchError> {
        self.process_batch(bodies).await.into_result()
    }

    async fn process_record(
        &self,
        record: &[u8],
    ) -> Result<(ProbeRequest, CommandResponse), IngestError> {
        let probe = ProbeRequest::parse(record)?;
        let invocation = CommandInvocation::new(LATENCY_CALLBACK_COMMAND, probe.callback_payload());
        let call = self
            .invoker
            .invoke_device_method(&probe.device_id, invocation);
        let response = tokio::time::timeout(self.callback_timeout, call)
            .await
            .map_err(|_| IngestError::CallbackTimeout {
                device_id: probe.device_id.clone(),
                timeout: self.callback_timeout,
            })??;
        if !response.is_success() {
            return Err(IngestError::DeviceRejected {
                device_id: probe.device_id,
                status: response.status,
            });
        }
        Ok((probe, response))
    }
}
