//! ---
//! iot_section: "11-simulation"
//! iot_subsection: "01-bootstrap"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation module exports and shared types."
//! iot_version: "v0.1.0"
//! iot_owner: "tbd"
//! ---
//! Message template engine for R-IoTSim.
//!
//! Canonical bodies live in `messages/` and are embedded at build time. Each
//! emitted message is a copy of its template with the entity identity stamped
//! in and every data item re-timestamped and re-valued.

pub mod templates;

use r_iot_msg::MessageKind;

/// Shared result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("no template registered for {0} messages")]
    TemplateNotFound(MessageKind),
    #[error("malformed template: {0}")]
    MalformedTemplate(String),
    #[error("device id is required to stamp a template")]
    MissingIdentity,
    #[error("unable to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub use templates::{randomize, randomize_with, stamp_identity, TemplateStore};
