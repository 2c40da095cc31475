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

use r_iot_common::{EntityIdentity, IngestionConfig, ManualClock, SharedClock, SimulationProfile};
use r_iot_core::SimulationRuntime;
use r_iot_ingest::{BatchError, IngestError, IngestionPipeline, LatencyBatchProcessor};
use r_iot_msg::{InMemoryHub, LatencyProbe, MessageKind, Transport};
use serde_json::json;

fn device(id: &str) -> EntityIdentity {
    EntityIdentity::new("hub.example.net", id, None)
}

#[tokio::test(start_paused = true)]
async fn latency_record_is_answered_with_measured_latency() -> anyhow::Result<()> {
    let hub = InMemoryHub::new();
    let identity = device("press-01");
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let shared: SharedClock = clock.clone();
    let runtime = SimulationRuntime::builder(identity.clone(), hub.attach(&identity))
        .profile(SimulationProfile::default())
        .clock(shared)
        .build();
    runtime.start().await?;

    runtime.send_latency_once().await?;
    clock.advance(3);

    let bodies: Vec<_> = hub
        .drain_outbound()
        .into_iter()
        .filter(|(_, envelope)| envelope.kind == MessageKind::Latency)
        .map(|(_, envelope)| envelope.body)
        .collect();
    assert_eq!(bodies.len(), 1);

    let processor = LatencyBatchProcessor::new(Arc::new(hub.clone()));
    let outcome = processor.process_batch(&bodies).await;
    assert!(outcome.failures.is_empty());
    assert_eq!(
        outcome.dispatched[0].response.body_json(),
        Some(json!({ "result": "Executed direct method: LatencyTestCallback", "latency": 3 }))
    );

    runtime.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pipeline_counts_streams_and_reports_unknown_devices() -> anyhow::Result<()> {
    let hub = InMemoryHub::new();
    let identity = device("press-01");
    let runtime = SimulationRuntime::builder(identity.clone(), hub.attach(&identity)).build();
    runtime.start().await?;

    // A record from a device that never connected, relayed through an attached one.
    let relay = hub.attach(&device("relay"));
    relay
        .send(LatencyProbe::new("ghost", 1_700_000_000).to_envelope()?)
        .await?;
    runtime.send_latency_once().await?;

    let config = IngestionConfig {
        batch_size: 1,
        poll_interval: Duration::from_secs(1),
        ..IngestionConfig::default()
    };
    let processor = LatencyBatchProcessor::new(Arc::new(hub.clone()))
        .with_callback_timeout(config.callback_timeout);
    let mut pipeline = IngestionPipeline::new(hub.clone(), processor, &config);
    pipeline.drain_once().await;

    let stats = pipeline.stats();
    assert_eq!(stats.received.get(&MessageKind::Latency), Some(&2));
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.callbacks, 1);
    assert_eq!(stats.failed_items, 1);
    assert_eq!(stats.failed_batches, 1);

    let processor = LatencyBatchProcessor::new(Arc::new(hub.clone()));
    let ghost = LatencyProbe::new("ghost", 1).to_envelope()?.body;
    match processor.process_bodies(&[ghost]).await {
        Err(BatchError::Single(failure)) => {
            assert!(matches!(failure.error, IngestError::DeviceNotFound(ref id) if id == "ghost"))
        }
        other => panic!("expected a single failure, got {other:?}"),
    }

    runtime.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pipeline_drains_once_more_on_shutdown() -> anyhow::Result<()> {
    let hub = InMemoryHub::new();
    let identity = device("press-01");
    let runtime = SimulationRuntime::builder(identity.clone(), hub.attach(&identity)).build();
    runtime.start().await?;

    let config = IngestionConfig {
        poll_interval: Duration::from_secs(3600),
        ..IngestionConfig::default()
    };
    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let pipeline = IngestionPipeline::new(
        hub.clone(),
        LatencyBatchProcessor::new(Arc::new(hub.clone())),
        &config,
    )
    .with_shutdown(rx);
    let handle = tokio::spawn(pipeline.run());

    runtime.send_latency_once().await?;
    tx.send(())?;
    let stats = handle.await?;
    assert_eq!(stats.callbacks, 1);
    assert_eq!(stats.failed_items, 0);

    runtime.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn out_of_range_start_does_not_stop_the_batch() -> anyhow::Result<()> {
    let hub = InMemoryHub::new();
    let identity = device("press-01");
    let clock = Arc::new(ManualClock::new(1_700_000_010));
    let shared: SharedClock = clock.clone();
    let runtime = SimulationRuntime::builder(identity.clone(), hub.attach(&identity))
        .clock(shared)
        .build();
    runtime.start().await?;

    let records = vec![
        json!({ "deviceId": "press-01", "startTimestamp": i64::MIN }).to_string(),
        json!({ "deviceId": "press-01", "startTimestamp": 1_700_000_000 }).to_string(),
    ];
    let outcome = LatencyBatchProcessor::new(Arc::new(hub.clone()))
        .process_batch(&records)
        .await;

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.dispatched.len(), 2);
    assert_eq!(
        outcome.dispatched[0].response.body_json(),
        Some(json!({ "result": "Executed direct method: LatencyTestCallback" }))
    );
    assert_eq!(
        outcome.dispatched[1].response.body_json(),
        Some(json!({ "result": "Executed direct method: LatencyTestCallback", "latency": 10 }))
    );

    runtime.shutdown().await;
    Ok(())
}
