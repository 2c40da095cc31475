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

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use r_iot_common::SharedClock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::RebootError;
use crate::state::RuntimeState;
use crate::twin::{RebootStatus, TwinReporter};

/// Called once a reboot has completed and the stop flag is clear again.
pub type ResumeHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootPhase {
    Running,
    Stopping,
    Rebooting,
}

/// Cooperative stop, quiesce, and resume of an entity's publisher loops.
pub struct RebootOrchestrator {
    artifact_id: String,
    state: Arc<RuntimeState>,
    twin: TwinReporter,
    clock: SharedClock,
    quiesce_window: Duration,
    phase: Mutex<RebootPhase>,
    on_resume: Option<ResumeHook>,
}

impl RebootOrchestrator {
    pub fn new(
        artifact_id: impl Into<String>,
        state: Arc<RuntimeState>,
        twin: TwinReporter,
        clock: SharedClock,
        quiesce_window: Duration,
    ) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            state,
            twin,
            clock,
            quiesce_window,
            phase: Mutex::new(RebootPhase::Running),
            on_resume: None,
        }
    }

    pub fn with_resume_hook(mut self, hook: ResumeHook) -> Self {
        self.on_resume = Some(hook);
        self
    }

    pub fn phase(&self) -> RebootPhase {
        *self.phase.lock()
    }

    /// Start a reboot sequence on a detached task.
    pub fn trigger(self: &Arc<Self>) -> Result<JoinHandle<()>, RebootError> {
        if !self.state.try_begin_reboot() {
            return Err(RebootError::AlreadyInProgress(self.artifact_id.clone()));
        }
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run_sequence().await }))
    }

    async fn run_sequence(&self) {
        let guard = ResetGuard {
            state: &self.state,
            phase: &self.phase,
        };
        info!(artifact_id = %self.artifact_id, "reboot requested");

        self.set_phase(RebootPhase::Stopping);
        self.state.request_stop();
        debug!(artifact_id = %self.artifact_id, "publisher loops asked to stop");

        self.set_phase(RebootPhase::Rebooting);
        let last_reboot = DateTime::<Utc>::from_timestamp(self.clock.unix_seconds(), 0)
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();
        self.twin
            .report_reboot_status(&last_reboot, RebootStatus::Rebooting)
            .await;
        tokio::time::sleep(self.quiesce_window).await;

        self.set_phase(RebootPhase::Running);
        self.twin
            .report_reboot_status(&last_reboot, RebootStatus::Online)
            .await;
        drop(guard);
        info!(artifact_id = %self.artifact_id, "reboot complete, system online");

        if let Some(hook) = &self.on_resume {
            hook();
        }
    }

    fn set_phase(&self, phase: RebootPhase) {
        *self.phase.lock() = phase;
        debug!(artifact_id = %self.artifact_id, phase = ?phase, "reboot phase");
    }
}

/// Clears the stop flag and releases the reboot slot however the sequence ends.
struct ResetGuard<'a> {
    state: &'a RuntimeState,
    phase: &'a Mutex<RebootPhase>,
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = RebootPhase::Running;
        self.state.clear_stop();
        self.state.end_reboot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_iot_common::ManualClock;
    use r_iot_msg::InMemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orchestrator(transport: Arc<InMemoryTransport>) -> (RebootOrchestrator, Arc<RuntimeState>) {
        let state = Arc::new(RuntimeState::new(10));
        let orchestrator = RebootOrchestrator::new(
            "dev-1",
            state.clone(),
            TwinReporter::new("dev-1", transport),
            Arc::new(ManualClock::new(1_767_225_600)),
            Duration::from_secs(10),
        );
        (orchestrator, state)
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_reports_and_resets() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        let (orchestrator, state) = orchestrator(transport.clone());
        let orchestrator = Arc::new(orchestrator);

        let handle = orchestrator.trigger().expect("first reboot accepted");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(state.stop_requested());
        assert_eq!(orchestrator.phase(), RebootPhase::Rebooting);
        assert_eq!(
            orchestrator.trigger().unwrap_err(),
            RebootError::AlreadyInProgress("dev-1".into())
        );

        handle.await.expect("sequence joins");
        assert!(!state.stop_requested());
        assert!(!state.reboot_in_progress());
        assert_eq!(orchestrator.phase(), RebootPhase::Running);

        let statuses: Vec<_> = transport
            .reported_patches()
            .iter()
            .map(|p| p["iothubDM"]["rebootStatus"].clone())
            .collect();
        assert_eq!(statuses, vec!["rebooting", "online"]);
        assert_eq!(
            transport.reported()["iothubDM"]["reboot"]["lastReboot"],
            "2026-01-01T00:00:00+00:00"
        );

        orchestrator
            .trigger()
            .expect("reboot accepted again")
            .await
            .expect("second sequence joins");
    }

    #[tokio::test(start_paused = true)]
    async fn reporting_failures_still_reset_and_resume() {
        let transport = Arc::new(InMemoryTransport::new("dev-1"));
        transport.set_fail_reports(true);
        let (orchestrator, state) = orchestrator(transport.clone());
        let resumed = Arc::new(AtomicUsize::new(0));
        let counter = resumed.clone();
        let orchestrator = Arc::new(orchestrator.with_resume_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        orchestrator
            .trigger()
            .expect("reboot accepted")
            .await
            .expect("sequence joins");
        assert!(!state.stop_requested());
        assert!(!state.reboot_in_progress());
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        assert!(transport.reported_patches().is_empty());
    }
}
