//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Mutable state shared by every loop and handler of one entity.
///
/// Reads and writes are independent atomics with last-write-wins semantics.
/// `generation` advances on every stop request so loops spawned before a stop
/// can tell they have been replaced once the flag is cleared again.
#[derive(Debug)]
pub struct RuntimeState {
    telemetry_interval: AtomicI64,
    stop_requested: AtomicBool,
    reboot_in_progress: AtomicBool,
    generation: AtomicU64,
}

impl RuntimeState {
    pub fn new(telemetry_interval_secs: i64) -> Self {
        Self {
            telemetry_interval: AtomicI64::new(telemetry_interval_secs),
            stop_requested: AtomicBool::new(false),
            reboot_in_progress: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn telemetry_interval(&self) -> i64 {
        self.telemetry_interval.load(Ordering::SeqCst)
    }

    pub fn set_telemetry_interval(&self, seconds: i64) {
        self.telemetry_interval.store(seconds, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Raise the stop flag and retire the current generation.
    pub fn request_stop(&self) -> u64 {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a loop started at `generation` should run another cycle.
    pub fn should_continue(&self, generation: u64) -> bool {
        !self.stop_requested() && self.generation() == generation
    }

    /// Claim the single reboot slot; `false` if a reboot is already running.
    pub fn try_begin_reboot(&self) -> bool {
        self.reboot_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_reboot(&self) {
        self.reboot_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn reboot_in_progress(&self) -> bool {
        self.reboot_in_progress.load(Ordering::SeqCst)
    }
}
