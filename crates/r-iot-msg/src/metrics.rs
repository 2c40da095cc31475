//! ---
//! iot_section: "02-messaging-ipc-data-model"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Message envelopes, command types, and transport interfaces."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

use crate::types::MessageKind;

/// Prometheus handles for simulation activity.
#[derive(Clone)]
pub struct SimulationMetrics {
    sent: IntCounterVec,
    failed: IntCounterVec,
    commands: IntCounterVec,
    latency: Histogram,
}

impl SimulationMetrics {
    /// Register the simulation metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sent = IntCounterVec::new(
            Opts::new("iot_messages_sent_total", "Messages accepted by the transport"),
            &["kind"],
        )?;
        let failed = IntCounterVec::new(
            Opts::new("iot_messages_failed_total", "Messages the transport rejected"),
            &["kind"],
        )?;
        let commands = IntCounterVec::new(
            Opts::new(
                "iot_commands_dispatched_total",
                "Commands routed by the dispatcher",
            ),
            &["command", "status"],
        )?;
        let latency = Histogram::with_opts(
            HistogramOpts::new(
                "iot_latency_roundtrip_seconds",
                "Round-trip latency reported by latency callbacks",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(commands.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            sent,
            failed,
            commands,
            latency,
        })
    }

    /// Record a message accepted by the transport.
    pub fn observe_sent(&self, kind: MessageKind) {
        self.sent.with_label_values(&[kind.as_ref()]).inc();
    }

    /// Record a message the transport rejected.
    pub fn observe_failed(&self, kind: MessageKind) {
        self.failed.with_label_values(&[kind.as_ref()]).inc();
    }

    /// Record a dispatched command and its response status.
    pub fn observe_command(&self, command: &str, status: u16) {
        self.commands
            .with_label_values(&[command, &status.to_string()])
            .inc();
    }

    /// Record a computed round-trip latency in seconds.
    pub fn observe_latency(&self, seconds: i64) {
        self.latency.observe(seconds.max(0) as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_records() {
        let registry = Registry::new();
        let metrics = SimulationMetrics::register(&registry).expect("register metrics");
        metrics.observe_sent(MessageKind::Telemetry);
        metrics.observe_failed(MessageKind::Latency);
        metrics.observe_command("Reboot", 200);
        metrics.observe_latency(3);

        let families = registry.gather();
        let sent = families
            .iter()
            .find(|f| f.get_name() == "iot_messages_sent_total")
            .expect("sent family");
        assert_eq!(sent.get_metric()[0].get_counter().get_value() as u64, 1);
        assert!(families
            .iter()
            .any(|f| f.get_name() == "iot_latency_roundtrip_seconds"));
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = Registry::new();
        SimulationMetrics::register(&registry).expect("first registration");
        assert!(SimulationMetrics::register(&registry).is_err());
    }
}
