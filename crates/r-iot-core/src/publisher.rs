//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use r_iot_msg::{MessageEnvelope, MessageKind, SimulationMetrics, Transport};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::errors::PublishError;
use crate::state::RuntimeState;

/// Current interval in seconds, read once per cycle.
pub type IntervalProvider = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Produces the next envelope for a loop.
pub type EnvelopeBuilder = Arc<dyn Fn() -> Result<MessageEnvelope, PublishError> + Send + Sync>;

/// Why a publisher loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The entity's stop flag was raised.
    StopRequested,
    /// The stop flag was cleared again but this loop belongs to a retired
    /// generation.
    Superseded,
    /// Latency loop with a non-positive interval sent its single probe.
    OneShot,
    /// The template for this kind is missing.
    TemplateNotFound,
    /// The runtime is shutting down.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherReport {
    pub kind: MessageKind,
    pub cycles: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
    pub exit: LoopExit,
}

/// Periodic emitter for one message kind of one entity.
///
/// Each cycle builds an envelope, sends it, counts the cycle, checks the stop
/// flag, then sleeps for whatever the interval provider returns at that moment
/// and checks the flag again on waking. Send failures are logged and the loop
/// keeps its cadence.
pub struct PublisherLoop {
    kind: MessageKind,
    artifact_id: String,
    transport: Arc<dyn Transport>,
    state: Arc<RuntimeState>,
    generation: u64,
    interval: IntervalProvider,
    build: EnvelopeBuilder,
    metrics: Option<SimulationMetrics>,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl PublisherLoop {
    pub fn new(
        kind: MessageKind,
        artifact_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        state: Arc<RuntimeState>,
        interval: IntervalProvider,
        build: EnvelopeBuilder,
    ) -> Self {
        let generation = state.generation();
        Self {
            kind,
            artifact_id: artifact_id.into(),
            transport,
            state,
            generation,
            interval,
            build,
            metrics: None,
            shutdown: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<SimulationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub async fn run(mut self) -> PublisherReport {
        let mut report = PublisherReport {
            kind: self.kind,
            cycles: 0,
            sent: 0,
            failed: 0,
            skipped: 0,
            exit: LoopExit::StopRequested,
        };
        info!(artifact_id = %self.artifact_id, kind = %self.kind, "publisher loop started");

        loop {
            match (self.build)() {
                Ok(envelope) => match self.transport.send(envelope).await {
                    Ok(()) => {
                        report.sent += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.observe_sent(self.kind);
                        }
                    }
                    Err(err) => {
                        report.failed += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.observe_failed(self.kind);
                        }
                        warn!(artifact_id = %self.artifact_id, kind = %self.kind, error = %err, "transport send failed");
                    }
                },
                Err(err) if err.is_fatal() => {
                    error!(artifact_id = %self.artifact_id, kind = %self.kind, error = %err, "publisher loop aborted");
                    report.exit = LoopExit::TemplateNotFound;
                    return report;
                }
                Err(err) => {
                    report.skipped += 1;
                    warn!(artifact_id = %self.artifact_id, kind = %self.kind, error = %err, "message skipped");
                }
            }
            report.cycles += 1;
            debug!(artifact_id = %self.artifact_id, kind = %self.kind, counter = report.cycles, "cycle complete");

            let interval = (self.interval)();
            if self.kind == MessageKind::Latency && interval <= 0 {
                report.exit = LoopExit::OneShot;
                break;
            }
            if let Some(exit) = self.retired() {
                report.exit = exit;
                break;
            }

            let pause = Duration::from_secs(interval.max(1).unsigned_abs());
            let interrupted = match self.shutdown.as_mut() {
                Some(shutdown) => tokio::select! {
                    _ = shutdown.recv() => true,
                    _ = tokio::time::sleep(pause) => false,
                },
                None => {
                    tokio::time::sleep(pause).await;
                    false
                }
            };
            if interrupted {
                report.exit = LoopExit::Shutdown;
                break;
            }
            if let Some(exit) = self.retired() {
                report.exit = exit;
                break;
            }
        }

        info!(
            artifact_id = %self.artifact_id,
            kind = %self.kind,
            sent = report.sent,
            failed = report.failed,
            exit = ?report.exit,
            "publisher loop finished"
        );
        report
    }

    /// A loop retired while asleep must not emit alongside its replacement.
    fn retired(&self) -> Option<LoopExit> {
        if self.state.stop_requested() {
            Some(LoopExit::StopRequested)
        } else if self.state.generation() != self.generation {
            Some(LoopExit::Superseded)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_iot_msg::InMemoryTransport;
    use r_iot_sim::TemplateError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed(secs: i64) -> IntervalProvider {
        Arc::new(move || secs)
    }

    fn envelope_of(kind: MessageKind) -> EnvelopeBuilder {
        Arc::new(move || Ok(MessageEnvelope::json(kind, "{}")))
    }

    #[tokio::test(start_paused = true)]
    async fn latency_with_non_positive_interval_sends_once() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        let state = Arc::new(RuntimeState::new(10));
        let report = PublisherLoop::new(
            MessageKind::Latency,
            "dev-1",
            transport.clone(),
            state,
            fixed(0),
            envelope_of(MessageKind::Latency),
        )
        .run()
        .await;
        assert_eq!(report.exit, LoopExit::OneShot);
        assert_eq!(report.sent, 1);
        assert_eq!(transport.outbound_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_do_not_stop_the_loop() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        transport.set_fail_sends(true);
        let state = Arc::new(RuntimeState::new(10));
        let handle = tokio::spawn(
            PublisherLoop::new(
                MessageKind::Error,
                "dev-1",
                transport.clone(),
                state.clone(),
                fixed(5),
                envelope_of(MessageKind::Error),
            )
            .run(),
        );
        tokio::time::sleep(Duration::from_secs(11)).await;
        state.request_stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let report = handle.await.expect("loop joins");
        assert_eq!(report.failed, 3);
        assert_eq!(report.sent, 0);
        assert_eq!(report.exit, LoopExit::StopRequested);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_template_ends_only_this_loop() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        let state = Arc::new(RuntimeState::new(10));
        let build: EnvelopeBuilder = Arc::new(|| {
            Err(TemplateError::TemplateNotFound(MessageKind::Commissioning).into())
        });
        let report = PublisherLoop::new(
            MessageKind::Commissioning,
            "dev-1",
            transport,
            state,
            fixed(1),
            build,
        )
        .run()
        .await;
        assert_eq!(report.exit, LoopExit::TemplateNotFound);
        assert_eq!(report.cycles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_output_is_skipped() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        let state = Arc::new(RuntimeState::new(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stopper = state.clone();
        let build: EnvelopeBuilder = Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(TemplateError::MalformedTemplate("truncated".into()).into());
            }
            stopper.request_stop();
            Ok(MessageEnvelope::json(MessageKind::Telemetry, "{}"))
        });
        let report = PublisherLoop::new(
            MessageKind::Telemetry,
            "dev-1",
            transport,
            state,
            fixed(1),
            build,
        )
        .run()
        .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_sleep() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        let state = Arc::new(RuntimeState::new(10));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(
            PublisherLoop::new(
                MessageKind::Telemetry,
                "dev-1",
                transport,
                state,
                fixed(3600),
                envelope_of(MessageKind::Telemetry),
            )
            .with_shutdown(rx)
            .run(),
        );
        tokio::task::yield_now().await;
        tx.send(()).expect("receiver alive");
        let report = handle.await.expect("loop joins");
        assert_eq!(report.exit, LoopExit::Shutdown);
        assert_eq!(report.sent, 1);
    }
}
