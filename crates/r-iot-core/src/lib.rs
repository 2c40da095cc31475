//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
//! Simulation runtime for R-IoTSim.
//!
//! One [`SimulationRuntime`] drives a single simulated entity: a publisher loop
//! per enabled message kind, the command dispatcher bound to the entity's
//! transport, the reboot orchestrator, and the device side of the latency
//! round-trip protocol.

pub mod commands;
pub mod dispatcher;
pub mod errors;
pub mod latency;
pub mod publisher;
pub mod reboot;
pub mod runtime;
pub mod state;
pub mod twin;

pub use dispatcher::CommandDispatcher;
pub use errors::{DispatchError, PublishError, RebootError};
pub use publisher::{LoopExit, PublisherLoop, PublisherReport};
pub use reboot::{RebootOrchestrator, RebootPhase};
pub use runtime::{SimulationRuntime, SimulationRuntimeBuilder};
pub use state::RuntimeState;
pub use twin::{RebootStatus, TwinReporter};
