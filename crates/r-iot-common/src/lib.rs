//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Shared primitives and utilities for the simulation runtime."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
//! Core shared primitives for the R-IoTSim workspace.
//! This crate exposes configuration loading, entity identity parsing, logging
//! setup, and the clock abstraction consumed across the workspace.

pub mod config;
pub mod identity;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, EntityConfig, IngestionConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    RebootConfig, SimulationProfile, StreamSettings,
};
pub use identity::{EntityIdentity, IdentityError};
pub use logging::{init_tracing, LogFormat};
pub use time::{Clock, ManualClock, SharedClock, SystemClock};
