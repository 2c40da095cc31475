//! ---
//! iot_section: "02-messaging-ipc-data-model"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Message envelopes, command types, and transport interfaces."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Notify;

use crate::logging::{log_message, MessageDirection};
use crate::types::{CommandInvocation, CommandResponse, MessageEnvelope, StateMap};
use crate::{MessagingError, Result};

/// Handler invoked for a named command.
pub type CommandHandler =
    Arc<dyn Fn(CommandInvocation) -> BoxFuture<'static, CommandResponse> + Send + Sync>;

/// Callback invoked with each desired-state patch pushed by the cloud.
pub type DesiredStateCallback = Arc<dyn Fn(StateMap) -> BoxFuture<'static, ()> + Send + Sync>;

/// Connection to the cloud endpoint for one entity.
///
/// Implementations own connection management; callers treat every method as
/// potentially slow and fallible.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a device-to-cloud message.
    async fn send(&self, envelope: MessageEnvelope) -> Result<()>;
    /// Wait briefly for one cloud-to-device message.
    async fn receive_one_shot(&self) -> Result<Option<MessageEnvelope>>;
    /// Merge `patch` into the reported section of the twin document.
    async fn report_state(&self, patch: StateMap) -> Result<()>;
    /// Fetch the twin document, `None` when the cloud holds none.
    async fn get_state(&self) -> Result<Option<StateMap>>;
    /// Register the handler for command `name`, replacing any previous one.
    async fn set_command_handler(&self, name: &str, handler: CommandHandler) -> Result<()>;
    /// Register the fallback handler for unknown command names.
    async fn set_default_command_handler(&self, handler: CommandHandler) -> Result<()>;
    /// Register a callback for desired-state patches.
    async fn on_desired_state_change(&self, callback: DesiredStateCallback) -> Result<()>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Counters kept by [`InMemoryTransport`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    /// Envelopes accepted by `send`.
    pub sent: u64,
    /// Sends or reports rejected while failure injection was active.
    pub failed: u64,
    /// Reported-state patches accepted.
    pub reported: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    reported: AtomicU64,
}

#[derive(Default)]
struct TwinDocument {
    desired: StateMap,
    reported: StateMap,
    patches: Vec<StateMap>,
}

/// Process-local transport that records everything it is handed.
///
/// Used by the daemon's in-process hub and by tests, which can inject send or
/// report failures and act as the cloud side through [`InMemoryTransport::invoke`],
/// [`InMemoryTransport::push_inbound`] and [`InMemoryTransport::push_desired`].
pub struct InMemoryTransport {
    artifact_id: String,
    receive_timeout: Duration,
    outbound: Mutex<VecDeque<MessageEnvelope>>,
    inbound: Mutex<VecDeque<MessageEnvelope>>,
    inbound_ready: Notify,
    twin: Mutex<TwinDocument>,
    handlers: Mutex<HashMap<String, CommandHandler>>,
    default_handler: Mutex<Option<CommandHandler>>,
    desired_callbacks: Mutex<Vec<DesiredStateCallback>>,
    fail_sends: AtomicBool,
    fail_reports: AtomicBool,
    counters: Counters,
}

impl InMemoryTransport {
    /// Create a transport for `artifact_id`.
    pub fn new(artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            receive_timeout: Duration::from_secs(1),
            outbound: Mutex::new(VecDeque::new()),
            inbound: Mutex::new(VecDeque::new()),
            inbound_ready: Notify::new(),
            twin: Mutex::new(TwinDocument::default()),
            handlers: Mutex::new(HashMap::new()),
            default_handler: Mutex::new(None),
            desired_callbacks: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            fail_reports: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Override how long `receive_one_shot` waits for a message.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Artifact id this transport belongs to.
    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    /// Make subsequent sends fail until cleared.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent state reports fail until cleared.
    pub fn set_fail_reports(&self, fail: bool) {
        self.fail_reports.store(fail, Ordering::SeqCst);
    }

    /// Remove and return every envelope sent so far.
    pub fn drain_outbound(&self) -> Vec<MessageEnvelope> {
        self.outbound.lock().drain(..).collect()
    }

    /// Number of envelopes waiting in the outbound queue.
    pub fn outbound_len(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Queue a cloud-to-device message.
    pub fn push_inbound(&self, envelope: MessageEnvelope) {
        self.inbound.lock().push_back(envelope);
        self.inbound_ready.notify_one();
    }

    /// Cloud-to-device messages not yet received.
    pub fn inbound_len(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Apply a desired-state patch and run every registered callback.
    pub async fn push_desired(&self, patch: StateMap) {
        merge_patch(&mut self.twin.lock().desired, &patch);
        let callbacks = self.desired_callbacks.lock().clone();
        for callback in callbacks {
            callback(patch.clone()).await;
        }
    }

    /// Invoke a command as the cloud would.
    ///
    /// Unknown names with no default handler yield a 501 response.
    pub async fn invoke(&self, invocation: CommandInvocation) -> CommandResponse {
        log_message(MessageDirection::Command, &self.artifact_id, &invocation.name);
        let handler = self
            .handlers
            .lock()
            .get(&invocation.name)
            .cloned()
            .or_else(|| self.default_handler.lock().clone());
        match handler {
            Some(handler) => handler(invocation).await,
            None => CommandResponse::new(
                501,
                &json!({ "result": format!("no handler registered for {}", invocation.name) }),
            ),
        }
    }

    /// Names of the registered command handlers, sorted.
    pub fn registered_commands(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Current reported section of the twin.
    pub fn reported(&self) -> StateMap {
        self.twin.lock().reported.clone()
    }

    /// Every reported patch in arrival order.
    pub fn reported_patches(&self) -> Vec<StateMap> {
        self.twin.lock().patches.clone()
    }

    /// Snapshot of the transport counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            reported: self.counters.reported.load(Ordering::Relaxed),
        }
    }

    fn take_inbound(&self) -> Option<MessageEnvelope> {
        self.inbound.lock().pop_front()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, envelope: MessageEnvelope) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return Err(MessagingError::transport(self.name(), "send rejected"));
        }
        log_message(MessageDirection::Outbound, &self.artifact_id, envelope.kind.as_ref());
        self.outbound.lock().push_back(envelope);
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn receive_one_shot(&self) -> Result<Option<MessageEnvelope>> {
        let mut received = self.take_inbound();
        if received.is_none() {
            let _ = tokio::time::timeout(self.receive_timeout, self.inbound_ready.notified()).await;
            received = self.take_inbound();
        }
        if let Some(envelope) = &received {
            log_message(MessageDirection::Inbound, &self.artifact_id, envelope.kind.as_ref());
        }
        Ok(received)
    }

    async fn report_state(&self, patch: StateMap) -> Result<()> {
        if self.fail_reports.load(Ordering::SeqCst) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return Err(MessagingError::transport(self.name(), "report rejected"));
        }
        let mut twin = self.twin.lock();
        merge_patch(&mut twin.reported, &patch);
        twin.patches.push(patch);
        self.counters.reported.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get_state(&self) -> Result<Option<StateMap>> {
        let twin = self.twin.lock();
        if twin.desired.is_empty() && twin.reported.is_empty() {
            return Ok(None);
        }
        let mut document = StateMap::new();
        document.insert("desired".into(), JsonValue::Object(twin.desired.clone()));
        document.insert("reported".into(), JsonValue::Object(twin.reported.clone()));
        Ok(Some(document))
    }

    async fn set_command_handler(&self, name: &str, handler: CommandHandler) -> Result<()> {
        self.handlers.lock().insert(name.to_owned(), handler);
        Ok(())
    }

    async fn set_default_command_handler(&self, handler: CommandHandler) -> Result<()> {
        *self.default_handler.lock() = Some(handler);
        Ok(())
    }

    async fn on_desired_state_change(&self, callback: DesiredStateCallback) -> Result<()> {
        self.desired_callbacks.lock().push(callback);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// JSON merge-patch: objects merge recursively, `null` removes a key.
fn merge_patch(target: &mut StateMap, patch: &StateMap) {
    for (key, value) in patch {
        match value {
            JsonValue::Null => {
                target.remove(key);
            }
            JsonValue::Object(inner) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| JsonValue::Object(StateMap::new()));
                if !slot.is_object() {
                    *slot = JsonValue::Object(StateMap::new());
                }
                if let JsonValue::Object(existing) = slot {
                    merge_patch(existing, inner);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;
    use futures::FutureExt;

    fn patch(value: JsonValue) -> StateMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn send_failure_is_counted_and_not_queued() {
        let transport = InMemoryTransport::new("dev-1");
        transport.set_fail_sends(true);
        let err = transport
            .send(MessageEnvelope::json(MessageKind::Telemetry, "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::TransportFailure { .. }));
        assert_eq!(transport.outbound_len(), 0);

        transport.set_fail_sends(false);
        transport
            .send(MessageEnvelope::json(MessageKind::Error, "{}"))
            .await
            .expect("send succeeds");
        assert_eq!(
            transport.stats(),
            TransportStats {
                sent: 1,
                failed: 1,
                reported: 0
            }
        );
    }

    #[tokio::test]
    async fn reported_patches_merge_nested_objects() {
        let transport = InMemoryTransport::new("dev-1");
        transport
            .report_state(patch(json!({"iothubDM": {"reboot": {"lastReboot": "t0"}}})))
            .await
            .expect("report");
        transport
            .report_state(patch(json!({"iothubDM": {"reboot": {"rebootStatus": "online"}}})))
            .await
            .expect("report");
        assert_eq!(
            JsonValue::Object(transport.reported()),
            json!({"iothubDM": {"reboot": {"lastReboot": "t0", "rebootStatus": "online"}}})
        );
        assert_eq!(transport.reported_patches().len(), 2);
    }

    #[tokio::test]
    async fn invoke_prefers_named_handler_then_default() {
        let transport = InMemoryTransport::new("dev-1");
        let named: CommandHandler = Arc::new(|_inv: CommandInvocation| {
            async { CommandResponse::ok(json!({"who": "named"})) }.boxed()
        });
        let fallback: CommandHandler = Arc::new(|_inv: CommandInvocation| {
            async { CommandResponse::ok(json!({"who": "default"})) }.boxed()
        });

        let missing = transport.invoke(CommandInvocation::new("Ping", "")).await;
        assert_eq!(missing.status, 501);

        transport.set_command_handler("Ping", named).await.expect("register");
        transport
            .set_default_command_handler(fallback)
            .await
            .expect("register default");

        let hit = transport.invoke(CommandInvocation::new("Ping", "")).await;
        assert_eq!(hit.body_json(), Some(json!({"who": "named"})));
        let miss = transport.invoke(CommandInvocation::new("Pong", "")).await;
        assert_eq!(miss.body_json(), Some(json!({"who": "default"})));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_one_shot_times_out_empty() {
        let transport = InMemoryTransport::new("dev-1");
        assert!(transport.receive_one_shot().await.expect("receive").is_none());

        transport.push_inbound(MessageEnvelope::json(MessageKind::Telemetry, "{}"));
        assert!(transport.receive_one_shot().await.expect("receive").is_some());
    }
}
