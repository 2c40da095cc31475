//! ---
//! iot_section: "04-ingestion-latency"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Latency probe ingestion and device callback dispatch."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use r_iot_common::IngestionConfig;
use r_iot_msg::{log_message, InMemoryHub, MessageDirection, MessageKind};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::batch::LatencyBatchProcessor;

/// Running totals kept by [`IngestionPipeline`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub polls: u64,
    pub received: BTreeMap<MessageKind, u64>,
    pub batches: u64,
    pub failed_batches: u64,
    pub callbacks: u64,
    pub failed_items: u64,
}

/// Drains the hub's device-to-cloud queue, counts every message, and feeds
/// latency probes to the batch processor in chunks of `batch_size`.
pub struct IngestionPipeline {
    hub: InMemoryHub,
    processor: LatencyBatchProcessor,
    batch_size: usize,
    poll_interval: Duration,
    shutdown: Option<broadcast::Receiver<()>>,
    stats: PipelineStats,
}

impl IngestionPipeline {
    pub fn new(
        hub: InMemoryHub,
        processor: LatencyBatchProcessor,
        config: &IngestionConfig,
    ) -> Self {
        Self {
            hub,
            processor,
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval,
            shutdown: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Poll until shutdown, then drain once more so no queued probe is lost.
    pub async fn run(mut self) -> PipelineStats {
        info!(
            batch_size = self.batch_size,
            poll_ms = self.poll_interval.as_millis() as u64,
            "ingestion pipeline started"
        );
        loop {
            let stopped = match self.shutdown.as_mut() {
                Some(shutdown) => tokio::select! {
                    _ = shutdown.recv() => true,
                    _ = tokio::time::sleep(self.poll_interval) => false,
                },
                None => {
                    tokio::time::sleep(self.poll_interval).await;
                    false
                }
            };
            self.drain_once().await;
            if stopped {
                break;
            }
        }
        info!(
            batches = self.stats.batches,
            callbacks = self.stats.callbacks,
            failed_items = self.stats.failed_items,
            "ingestion pipeline stopped"
        );
        self.stats
    }

    /// One poll: take everything queued on the hub and process the probes.
    pub async fn drain_once(&mut self) {
        self.stats.polls += 1;
        let mut probes: Vec<Bytes> = Vec::new();
        for (artifact_id, envelope) in self.hub.drain_outbound() {
            log_message(MessageDirection::Inbound, &artifact_id, envelope.kind.as_ref());
            *self.stats.received.entry(envelope.kind).or_default() += 1;
            if envelope.kind == MessageKind::Latency {
                probes.push(envelope.body);
            }
        }
        if probes.is_empty() {
            return;
        }
        debug!(probes = probes.len(), "dispatching latency probes");

        for chunk in probes.chunks(self.batch_size) {
            let outcome = self.processor.process_batch(chunk).await;
            self.stats.batches += 1;
            self.stats.callbacks += outcome.dispatched.len() as u64;
            self.stats.failed_items += outcome.failures.len() as u64;
            if let Err(err) = outcome.into_result() {
                self.stats.failed_batches += 1;
                error!(error = %err, "latency batch failed");
            }
        }
    }
}
