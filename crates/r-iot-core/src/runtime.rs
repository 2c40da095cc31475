//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use r_iot_common::{EntityIdentity, RebootConfig, SharedClock, SimulationProfile, SystemClock};
use r_iot_msg::{
    CommandHandler, CommandInvocation, CommandResponse, DesiredStateCallback, MessageEnvelope,
    MessageKind, SimulationMetrics, StateMap, Transport,
};
use r_iot_sim::TemplateStore;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::commands::{self, names, LatencyLauncher};
use crate::dispatcher::CommandDispatcher;
use crate::errors::PublishError;
use crate::latency;
use crate::publisher::{EnvelopeBuilder, IntervalProvider, PublisherLoop, PublisherReport};
use crate::reboot::RebootOrchestrator;
use crate::state::RuntimeState;
use crate::twin::TwinReporter;

const C2D_RETRY_DELAY: Duration = Duration::from_secs(1);
const CONNECTIVITY_LINK: &str = "cellular";
const CONNECTIVITY_SIGNAL: &str = "low";

/// Assembles a [`SimulationRuntime`] for one entity.
pub struct SimulationRuntimeBuilder {
    identity: EntityIdentity,
    transport: Arc<dyn Transport>,
    profile: SimulationProfile,
    reboot: RebootConfig,
    templates: TemplateStore,
    clock: SharedClock,
    metrics: Option<SimulationMetrics>,
}

impl SimulationRuntimeBuilder {
    pub fn new(identity: EntityIdentity, transport: Arc<dyn Transport>) -> Self {
        Self {
            identity,
            transport,
            profile: SimulationProfile::default(),
            reboot: RebootConfig::default(),
            templates: TemplateStore::embedded(),
            clock: SystemClock::shared(),
            metrics: None,
        }
    }

    pub fn profile(mut self, profile: SimulationProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn reboot(mut self, reboot: RebootConfig) -> Self {
        self.reboot = reboot;
        self
    }

    pub fn templates(mut self, templates: TemplateStore) -> Self {
        self.templates = templates;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Option<SimulationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> SimulationRuntime {
        let artifact_id = self.identity.artifact_id();
        let state = Arc::new(RuntimeState::new(self.profile.telemetry.interval_secs));
        let twin = TwinReporter::new(artifact_id.clone(), self.transport.clone());
        let dispatcher = Arc::new(
            CommandDispatcher::new(artifact_id.clone()).with_metrics(self.metrics.clone()),
        );
        let (shutdown, _) = broadcast::channel(4);

        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let resume = weak.clone();
            let reboot = RebootOrchestrator::new(
                artifact_id.clone(),
                state.clone(),
                twin.clone(),
                self.clock.clone(),
                self.reboot.quiesce_window,
            )
            .with_resume_hook(Arc::new(move || {
                if let Some(inner) = resume.upgrade() {
                    inner.resume_after_reboot();
                }
            }));
            RuntimeInner {
                artifact_id,
                identity: self.identity,
                profile: self.profile,
                transport: self.transport,
                templates: Arc::new(self.templates),
                clock: self.clock,
                state,
                dispatcher,
                reboot: Arc::new(reboot),
                twin,
                metrics: self.metrics,
                shutdown,
                shutting_down: AtomicBool::new(false),
                publishers: Mutex::new(Vec::new()),
                auxiliary: Mutex::new(Vec::new()),
            }
        });
        SimulationRuntime { inner }
    }
}

struct RuntimeInner {
    artifact_id: String,
    identity: EntityIdentity,
    profile: SimulationProfile,
    transport: Arc<dyn Transport>,
    templates: Arc<TemplateStore>,
    clock: SharedClock,
    state: Arc<RuntimeState>,
    dispatcher: Arc<CommandDispatcher>,
    reboot: Arc<RebootOrchestrator>,
    twin: TwinReporter,
    metrics: Option<SimulationMetrics>,
    shutdown: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    publishers: Mutex<Vec<JoinHandle<PublisherReport>>>,
    auxiliary: Mutex<Vec<JoinHandle<()>>>,
}

/// Coordinator for one simulated device or module.
///
/// Owns the entity's publisher loops, command dispatcher, and reboot
/// orchestrator. Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct SimulationRuntime {
    inner: Arc<RuntimeInner>,
}

impl SimulationRuntime {
    pub fn builder(
        identity: EntityIdentity,
        transport: Arc<dyn Transport>,
    ) -> SimulationRuntimeBuilder {
        SimulationRuntimeBuilder::new(identity, transport)
    }

    pub fn artifact_id(&self) -> &str {
        &self.inner.artifact_id
    }

    pub fn identity(&self) -> &EntityIdentity {
        &self.inner.identity
    }

    pub fn state(&self) -> Arc<RuntimeState> {
        self.inner.state.clone()
    }

    pub fn reboot_orchestrator(&self) -> Arc<RebootOrchestrator> {
        self.inner.reboot.clone()
    }

    /// Register handlers, bind them to the transport, and start every enabled
    /// stream. Fails only on wiring errors such as duplicate command names.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.profile.enable_desired_notifications {
            inner
                .transport
                .on_desired_state_change(desired_state_handler(
                    inner.artifact_id.clone(),
                    inner.twin.clone(),
                ))
                .await
                .context("unable to register desired-state callback")?;
        }

        if inner.profile.enable_commands {
            self.register_commands()?;
            self.bind_commands().await?;
        }

        inner.spawn_streams();

        if inner.profile.enable_twin_reads {
            inner.twin.report_connectivity(CONNECTIVITY_LINK, CONNECTIVITY_SIGNAL).await;
            inner.twin.read_and_log("startup").await;
        }

        info!(
            artifact_id = %inner.artifact_id,
            module = inner.identity.is_module(),
            commands = inner.profile.enable_commands,
            "simulation runtime started"
        );
        Ok(())
    }

    fn register_commands(&self) -> Result<()> {
        let inner = &self.inner;
        let id = || inner.artifact_id.clone();
        let dispatcher = &inner.dispatcher;

        dispatcher.register(
            names::SET_TELEMETRY_INTERVAL,
            commands::set_telemetry_interval(id(), inner.state.clone()),
        )?;
        dispatcher.register(names::REBOOT, commands::reboot(id(), inner.reboot.clone()))?;
        dispatcher.register(names::ON_OFF, commands::on_off(id()))?;
        dispatcher.register(names::READ_TWINS, commands::read_twins(inner.twin.clone()))?;
        dispatcher.register(names::GENERIC_OPAQUE, commands::generic(id()))?;
        dispatcher.register(names::GENERIC, commands::generic(id()))?;

        if !inner.identity.is_module() {
            dispatcher.register(
                names::LATENCY_CALLBACK,
                latency::callback_handler(id(), inner.clock.clone(), inner.metrics.clone()),
            )?;
            let weak = Arc::downgrade(&self.inner);
            let launcher: LatencyLauncher = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.spawn_latency_once();
                }
            });
            dispatcher.register(names::SEND_LATENCY_TEST, commands::send_latency_test(launcher))?;
        }
        Ok(())
    }

    async fn bind_commands(&self) -> Result<()> {
        let inner = &self.inner;
        for name in inner.dispatcher.names() {
            inner
                .transport
                .set_command_handler(&name, forward_to(inner.dispatcher.clone()))
                .await
                .with_context(|| format!("unable to bind command {}", name))?;
        }
        inner
            .transport
            .set_default_command_handler(forward_to(inner.dispatcher.clone()))
            .await
            .context("unable to bind default command handler")?;
        Ok(())
    }

    /// Route a command through the dispatcher as if the transport delivered it.
    pub async fn dispatch(&self, invocation: CommandInvocation) -> CommandResponse {
        self.inner.dispatcher.dispatch(invocation).await
    }

    /// Emit one latency probe on a detached one-shot loop.
    pub fn send_latency_once(&self) -> JoinHandle<PublisherReport> {
        self.inner.spawn_latency_once()
    }

    /// Stop every loop and wait for them, returning their reports.
    pub async fn shutdown(&self) -> Vec<PublisherReport> {
        let inner = &self.inner;
        let (publishers, auxiliary) = {
            let mut publishers = inner.publishers.lock();
            let mut auxiliary = inner.auxiliary.lock();
            inner.shutting_down.store(true, Ordering::SeqCst);
            inner.state.request_stop();
            let _ = inner.shutdown.send(());
            (
                publishers.drain(..).collect::<Vec<_>>(),
                auxiliary.drain(..).collect::<Vec<_>>(),
            )
        };

        let mut reports = Vec::with_capacity(publishers.len());
        for handle in publishers {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(artifact_id = %inner.artifact_id, error = %err, "publisher task join error")
                }
            }
        }
        for handle in auxiliary {
            if let Err(err) = handle.await {
                error!(artifact_id = %inner.artifact_id, error = %err, "auxiliary task join error");
            }
        }
        info!(artifact_id = %inner.artifact_id, loops = reports.len(), "simulation runtime stopped");
        reports
    }
}

impl RuntimeInner {
    fn spawn_streams(&self) {
        let profile = &self.profile;

        if profile.enable_c2d_messages {
            self.spawn_c2d_listener();
        }
        if profile.latency.enabled && !self.identity.is_module() {
            let interval = profile.latency.interval_secs;
            self.spawn_publisher(MessageKind::Latency, Arc::new(move || interval));
        }
        if profile.telemetry.enabled {
            let state = self.state.clone();
            self.spawn_publisher(
                MessageKind::Telemetry,
                Arc::new(move || state.telemetry_interval()),
            );
        }
        if profile.error.enabled {
            let interval = profile.error.interval_secs;
            self.spawn_publisher(MessageKind::Error, Arc::new(move || interval));
        }
        if profile.commissioning.enabled {
            let interval = profile.commissioning.interval_secs;
            self.spawn_publisher(MessageKind::Commissioning, Arc::new(move || interval));
        }
    }

    fn resume_after_reboot(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!(artifact_id = %self.artifact_id, "runtime shutting down, streams not resumed");
            return;
        }
        self.publishers.lock().retain(|handle| !handle.is_finished());
        self.auxiliary.lock().retain(|handle| !handle.is_finished());
        info!(
            artifact_id = %self.artifact_id,
            generation = self.state.generation(),
            "resuming streams after reboot"
        );
        self.spawn_streams();
    }

    /// One-shot probes end on their own, so they are not tracked for shutdown.
    fn spawn_latency_once(&self) -> JoinHandle<PublisherReport> {
        tokio::spawn(self.publisher(MessageKind::Latency, Arc::new(|| 0)).run())
    }

    /// The shutdown flag is re-read under the lock `shutdown` drains, so a
    /// loop is either joined there or never spawned.
    fn spawn_publisher(&self, kind: MessageKind, interval: IntervalProvider) {
        let mut publishers = self.publishers.lock();
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!(artifact_id = %self.artifact_id, kind = %kind, "runtime shutting down, loop not spawned");
            return;
        }
        publishers.push(tokio::spawn(self.publisher(kind, interval).run()));
    }

    fn publisher(&self, kind: MessageKind, interval: IntervalProvider) -> PublisherLoop {
        PublisherLoop::new(
            kind,
            self.artifact_id.clone(),
            self.transport.clone(),
            self.state.clone(),
            interval,
            self.envelope_builder(kind),
        )
        .with_metrics(self.metrics.clone())
        .with_shutdown(self.shutdown.subscribe())
    }

    fn envelope_builder(&self, kind: MessageKind) -> EnvelopeBuilder {
        let clock = self.clock.clone();
        match kind {
            MessageKind::Latency => {
                let device_id = self.identity.device_id.clone();
                Arc::new(move || latency::probe_envelope(&device_id, &clock))
            }
            _ => {
                let templates = self.templates.clone();
                let identity = self.identity.clone();
                Arc::new(move || -> Result<MessageEnvelope, PublishError> {
                    let body = templates.render(kind, &identity, clock.as_ref())?;
                    Ok(MessageEnvelope::json(kind, body))
                })
            }
        }
    }

    fn spawn_c2d_listener(&self) {
        let mut auxiliary = self.auxiliary.lock();
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let transport = self.transport.clone();
        let state = self.state.clone();
        let artifact_id = self.artifact_id.clone();
        let generation = state.generation();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            debug!(artifact_id = %artifact_id, "listening for cloud-to-device messages");
            while state.should_continue(generation) {
                let received = tokio::select! {
                    _ = shutdown.recv() => break,
                    received = transport.receive_one_shot() => received,
                };
                match received {
                    Ok(Some(envelope)) => {
                        let body = String::from_utf8_lossy(&envelope.body);
                        info!(
                            artifact_id = %artifact_id,
                            message_id = %envelope.id,
                            properties = ?envelope.properties,
                            body = %body,
                            "cloud-to-device message received"
                        );
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(artifact_id = %artifact_id, error = %err, "cloud-to-device receive failed");
                        tokio::time::sleep(C2D_RETRY_DELAY).await;
                    }
                }
            }
            debug!(artifact_id = %artifact_id, "cloud-to-device listener stopped");
        });
        auxiliary.push(handle);
    }
}

fn forward_to(dispatcher: Arc<CommandDispatcher>) -> CommandHandler {
    Arc::new(move |invocation: CommandInvocation| {
        let dispatcher = dispatcher.clone();
        async move { dispatcher.dispatch(invocation).await }.boxed()
    })
}

fn desired_state_handler(artifact_id: String, twin: TwinReporter) -> DesiredStateCallback {
    Arc::new(move |patch: StateMap| {
        let artifact_id = artifact_id.clone();
        let twin = twin.clone();
        async move {
            if patch.is_empty() {
                debug!(artifact_id = %artifact_id, "desired properties change is empty");
                return;
            }
            let desired = Value::Object(patch.clone());
            debug!(artifact_id = %artifact_id, desired = %desired, "desired properties change received");
            let reported = twin.apply_desired(&patch).await;
            if reported > 0 {
                info!(artifact_id = %artifact_id, reported, "desired properties acknowledged");
            }
        }
        .boxed()
    })
}
